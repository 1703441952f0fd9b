//! Audio track
//!
//! A track is itself a processor whose behavior is "render an ordered
//! chain of child processors". It owns its per-block input/output
//! buffers, two ping-pong scratch buffers and an internal event buffer
//! used when the track renders on a worker thread (where pushing
//! directly to the shared engine queue would race).
//!
//! Chain mutation happens only while the audio thread handles a
//! topology event for this track, or directly while the engine is
//! stopped.

use std::sync::Arc;

use smallvec::SmallVec;

use skiff_core::{
    ObjectId, ParameterDescriptor, ParameterId, Processor, ProcessorCommon, RtEvent, RtEventFifo,
    SampleBuffer, TRACK_MAX_BUSSES,
};

use crate::timing::PerformanceTimer;

/// Events a single track can buffer between drains
const TRACK_EVENT_BUFFER_SIZE: usize = 128;

pub struct Track {
    common: ProcessorCommon,
    chain: SmallVec<[Box<dyn Processor>; 8]>,
    input_buffer: SampleBuffer,
    output_buffer: SampleBuffer,
    scratch_a: SampleBuffer,
    scratch_b: SampleBuffer,
    output_events: Arc<RtEventFifo>,
    event_output_internal: bool,
    gain_id: ParameterId,
    pan_id: ParameterId,
    input_busses: usize,
    output_busses: usize,
}

impl Track {
    /// Track with a plain channel configuration (0..=2 channels)
    pub fn new(channels: usize) -> Self {
        Self::with_channels(channels, channels, 1, 1)
    }

    /// Track with `busses * 2` channels per side
    pub fn new_multibus(input_busses: usize, output_busses: usize) -> Self {
        debug_assert!(input_busses <= TRACK_MAX_BUSSES && output_busses <= TRACK_MAX_BUSSES);
        Self::with_channels(input_busses * 2, output_busses * 2, input_busses, output_busses)
    }

    fn with_channels(
        input_channels: usize,
        output_channels: usize,
        input_busses: usize,
        output_busses: usize,
    ) -> Self {
        let mut common = ProcessorCommon::new(input_channels, output_channels);
        let gain_id =
            common.register_parameter(ParameterDescriptor::db("gain", "Gain", 0.0, -120.0, 24.0));
        let pan_id =
            common.register_parameter(ParameterDescriptor::float("pan", "Pan", 0.0, -1.0, 1.0));

        let scratch_channels = input_channels.max(output_channels);
        Self {
            common,
            chain: SmallVec::new(),
            input_buffer: SampleBuffer::new(input_channels),
            output_buffer: SampleBuffer::new(output_channels),
            scratch_a: SampleBuffer::new(scratch_channels),
            scratch_b: SampleBuffer::new(scratch_channels),
            output_events: Arc::new(RtEventFifo::new(TRACK_EVENT_BUFFER_SIZE)),
            event_output_internal: false,
            gain_id,
            pan_id,
            input_busses,
            output_busses,
        }
    }

    /// Render one block from the input buffer to the output buffer
    pub fn render(&mut self, timer: Option<&PerformanceTimer>) {
        let track_started = timer.and_then(|t| t.start());

        self.scratch_a.copy_from(&self.input_buffer);
        for child in &mut self.chain {
            if !child.enabled() {
                continue;
            }
            let started = timer.and_then(|t| t.start());
            child.process_audio(&self.scratch_a, &mut self.scratch_b);
            std::mem::swap(&mut self.scratch_a, &mut self.scratch_b);
            if let Some(timer) = timer {
                timer.stop(started, child.id().as_index());
            }
        }

        self.output_buffer.copy_from(&self.scratch_a);
        self.apply_output_stage();

        if let Some(timer) = timer {
            timer.stop(track_started, self.id().as_index());
        }
    }

    /// Track-level gain and pan, applied after the chain
    fn apply_output_stage(&mut self) {
        let gain = self.common.parameters().value(self.gain_id);
        let pan = self.common.parameters().value(self.pan_id);

        if self.output_buffer.channel_count() == 2 && pan != 0.0 {
            let left_gain = gain * (1.0 - pan.max(0.0));
            let right_gain = gain * (1.0 + pan.min(0.0));
            self.output_buffer.apply_gain_to_channel(left_gain, 0);
            self.output_buffer.apply_gain_to_channel(right_gain, 1);
        } else if gain != 1.0 {
            self.output_buffer.apply_gain(gain);
        }
    }

    /// Append a processor to the end of the chain. A duplicate id hands
    /// the processor back to the caller. The child is wired to the
    /// track's channel width, clamped to the channels it declares it can
    /// handle, and to the track's event sink.
    pub fn add(&mut self, mut processor: Box<dyn Processor>) -> Result<(), Box<dyn Processor>> {
        if self.chain.iter().any(|p| p.id() == processor.id()) {
            return Err(processor);
        }
        let channels = self.input_channels();
        processor.set_input_channels(channels.min(processor.max_input_channels()));
        processor.set_output_channels(channels.min(processor.max_output_channels()));
        if self.event_output_internal {
            processor.set_event_output(Arc::clone(&self.output_events));
        } else if let Some(sink) = self.common.event_sink() {
            processor.set_event_output(sink);
        }
        self.chain.push(processor);
        Ok(())
    }

    /// Detach a processor from the chain, returning ownership
    pub fn remove(&mut self, id: ObjectId) -> Option<Box<dyn Processor>> {
        let position = self.chain.iter().position(|p| p.id() == id)?;
        Some(self.chain.remove(position))
    }

    /// A child processor of this track's chain, by id
    pub fn child_mut(&mut self, id: ObjectId) -> Option<&mut dyn Processor> {
        let position = self.chain.iter().position(|p| p.id() == id)?;
        Some(self.chain[position].as_mut())
    }

    /// Buffer events internally instead of pushing them straight to the
    /// engine queue; required when the track renders on a worker
    pub fn set_event_output_internal(&mut self) {
        self.event_output_internal = true;
        let sink = Arc::clone(&self.output_events);
        self.set_event_output(sink);
    }

    /// The internal event buffer drained by the engine
    pub fn output_event_buffer(&self) -> Arc<RtEventFifo> {
        Arc::clone(&self.output_events)
    }

    pub fn input_buffer_mut(&mut self) -> &mut SampleBuffer {
        &mut self.input_buffer
    }

    pub fn output_buffer(&self) -> &SampleBuffer {
        &self.output_buffer
    }

    pub fn input_busses(&self) -> usize {
        self.input_busses
    }

    pub fn output_busses(&self) -> usize {
        self.output_busses
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Names and ids of the chain, for the timing report
    pub fn chain_info(&self) -> Vec<(String, ObjectId)> {
        self.chain.iter().map(|p| (p.name().to_string(), p.id())).collect()
    }
}

/// Rebuild a keyboard event for fan-out to several children
fn clone_keyboard(event: &RtEvent) -> Option<RtEvent> {
    match *event {
        RtEvent::NoteOn { processor, offset, channel, note, velocity } => {
            Some(RtEvent::NoteOn { processor, offset, channel, note, velocity })
        }
        RtEvent::NoteOff { processor, offset, channel, note, velocity } => {
            Some(RtEvent::NoteOff { processor, offset, channel, note, velocity })
        }
        RtEvent::NoteAftertouch { processor, offset, channel, note, value } => {
            Some(RtEvent::NoteAftertouch { processor, offset, channel, note, value })
        }
        RtEvent::PitchBend { processor, offset, channel, value } => {
            Some(RtEvent::PitchBend { processor, offset, channel, value })
        }
        _ => None,
    }
}

impl Processor for Track {
    fn common(&self) -> &ProcessorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut ProcessorCommon {
        &mut self.common
    }

    fn configure(&mut self, sample_rate: f32) {
        self.common.set_sample_rate(sample_rate);
        for child in &mut self.chain {
            child.configure(sample_rate);
        }
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        self.input_buffer.copy_from(input);
        self.render(None);
        output.copy_from(&self.output_buffer);
    }

    /// Keyboard events fan out to every child and are re-emitted on the
    /// track's sink; everything else applies to the track's own
    /// parameters.
    fn process_event(&mut self, event: RtEvent) {
        if event.is_keyboard() {
            for child in &mut self.chain {
                if let Some(copy) = clone_keyboard(&event) {
                    child.process_event(copy);
                }
            }
            self.common.output_event(event);
        } else {
            self.common.apply_event(event);
        }
    }
}
