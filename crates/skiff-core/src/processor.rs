//! The processor contract
//!
//! Every node in the audio graph (internal DSP plugin, external plugin
//! wrapper, track) implements [`Processor`]. Implementations embed a
//! [`ProcessorCommon`] carrying the shared state (identity, parameters,
//! channel configuration, outbound CV/gate bindings, event sink); the
//! trait supplies the shared behavior as provided methods on top of it.
//!
//! Realtime constraints: `process_audio` and `process_event` run on the
//! audio thread or a worker and must not allocate, block or perform I/O.
//! Everything else runs off-thread and may do all of those.

use std::sync::Arc;

use crate::{
    ObjectId, ParameterDescriptor, ParameterId, ParameterStore, ProcessorError, RtEvent,
    RtEventFifo, SampleBuffer,
};

/// Outbound gate binding: note activity on (channel, note) leaves the
/// processor as a gate transition instead of a note event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutBinding {
    pub gate_id: usize,
    pub channel: u8,
    pub note: u8,
}

/// State shared by all processor implementations
pub struct ProcessorCommon {
    id: ObjectId,
    name: String,
    enabled: bool,
    sample_rate: f32,
    input_channels: usize,
    output_channels: usize,
    max_input_channels: usize,
    max_output_channels: usize,
    parameters: ParameterStore,
    cv_out_bindings: Vec<(ParameterId, usize)>,
    gate_out_bindings: Vec<GateOutBinding>,
    event_output: Option<Arc<RtEventFifo>>,
}

impl ProcessorCommon {
    /// The constructed channel counts double as the processor's maxima;
    /// a host wires fewer channels but never more.
    pub fn new(input_channels: usize, output_channels: usize) -> Self {
        Self {
            id: ObjectId::INVALID,
            name: String::new(),
            enabled: false,
            sample_rate: 0.0,
            input_channels,
            output_channels,
            max_input_channels: input_channels,
            max_output_channels: output_channels,
            parameters: ParameterStore::new(),
            cv_out_bindings: Vec::new(),
            gate_out_bindings: Vec::new(),
            event_output: None,
        }
    }

    /// Register a parameter during construction or `init`
    pub fn register_parameter(&mut self, descriptor: ParameterDescriptor) -> ParameterId {
        self.parameters.add(descriptor)
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterStore {
        &mut self.parameters
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    /// Apply a raw parameter value; when the parameter is bound to a CV
    /// output the change additionally leaves as a CV event
    pub fn set_parameter_raw(&mut self, id: ParameterId, raw: f32) {
        self.parameters.set_raw(id, raw);
        if let Some(&(_, cv_id)) = self.cv_out_bindings.iter().find(|(p, _)| *p == id) {
            let value = self.parameters.value(id);
            self.push_output(RtEvent::CvOut { cv_id, value });
        }
    }

    /// Default event application: parameter and property changes update
    /// the store, everything else is ignored
    pub fn apply_event(&mut self, event: RtEvent) {
        match event {
            RtEvent::ParameterChange { parameter, value, .. } => {
                self.set_parameter_raw(parameter, value);
            }
            RtEvent::IntParameterChange { parameter, value, .. } => {
                self.set_parameter_raw(parameter, value as f32);
            }
            RtEvent::BoolParameterChange { parameter, value, .. } => {
                self.set_parameter_raw(parameter, if value { 1.0 } else { 0.0 });
            }
            _ => {}
        }
    }

    /// Emit an event through the configured sink.
    ///
    /// Note events matching a gate binding leave as gate transitions.
    /// Without a sink, or when the sink is full, the event is dropped:
    /// emission never blocks the realtime path.
    pub fn output_event(&self, event: RtEvent) {
        let event = match event {
            RtEvent::NoteOn { channel, note, .. } => match self.gate_binding(channel, note) {
                Some(gate_id) => RtEvent::GateOut { gate_id, high: true },
                None => event,
            },
            RtEvent::NoteOff { channel, note, .. } => match self.gate_binding(channel, note) {
                Some(gate_id) => RtEvent::GateOut { gate_id, high: false },
                None => event,
            },
            other => other,
        };
        self.push_output(event);
    }

    fn gate_binding(&self, channel: u8, note: u8) -> Option<usize> {
        self.gate_out_bindings
            .iter()
            .find(|b| b.channel == channel && b.note == note)
            .map(|b| b.gate_id)
    }

    fn push_output(&self, event: RtEvent) {
        if let Some(sink) = &self.event_output {
            let _ = sink.push(event);
        }
    }

    /// Currently wired event sink, if any
    pub fn event_sink(&self) -> Option<Arc<RtEventFifo>> {
        self.event_output.clone()
    }

    pub fn connect_cv_from_parameter(
        &mut self,
        parameter: ParameterId,
        cv_id: usize,
    ) -> Result<(), ProcessorError> {
        if self.parameters.descriptor(parameter).is_none() {
            return Err(ProcessorError::InvalidParameter);
        }
        self.cv_out_bindings.retain(|(p, _)| *p != parameter);
        self.cv_out_bindings.push((parameter, cv_id));
        Ok(())
    }

    pub fn connect_gate_from_processor(&mut self, gate_id: usize, channel: u8, note: u8) {
        self.gate_out_bindings.retain(|b| b.gate_id != gate_id);
        self.gate_out_bindings.push(GateOutBinding { gate_id, channel, note });
    }
}

/// Uniform interface of every node in the audio graph
pub trait Processor: Send {
    fn common(&self) -> &ProcessorCommon;
    fn common_mut(&mut self) -> &mut ProcessorCommon;

    /// Off-thread (re)configuration for a sample rate; may allocate
    fn configure(&mut self, sample_rate: f32) {
        self.common_mut().set_sample_rate(sample_rate);
    }

    /// Off-thread initialisation; called once before first use
    fn init(&mut self, sample_rate: f32) -> Result<(), ProcessorError> {
        self.configure(sample_rate);
        Ok(())
    }

    /// Render one block. Realtime: no allocation, no locks, no I/O.
    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer);

    /// Apply one event. Realtime constraints as for `process_audio`.
    fn process_event(&mut self, event: RtEvent) {
        self.common_mut().apply_event(event);
    }

    // ── Provided accessors over the embedded common state ───────────────

    fn id(&self) -> ObjectId {
        self.common().id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.common_mut().id = id;
    }

    fn name(&self) -> &str {
        &self.common().name
    }

    fn set_name(&mut self, name: &str) {
        self.common_mut().name = name.to_string();
    }

    fn enabled(&self) -> bool {
        self.common().enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.common_mut().enabled = enabled;
    }

    fn input_channels(&self) -> usize {
        self.common().input_channels
    }

    fn output_channels(&self) -> usize {
        self.common().output_channels
    }

    fn set_input_channels(&mut self, channels: usize) {
        self.common_mut().input_channels = channels;
    }

    fn set_output_channels(&mut self, channels: usize) {
        self.common_mut().output_channels = channels;
    }

    /// Most channels this processor can consume
    fn max_input_channels(&self) -> usize {
        self.common().max_input_channels
    }

    /// Most channels this processor can produce
    fn max_output_channels(&self) -> usize {
        self.common().max_output_channels
    }

    fn parameter_from_name(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.common().parameters.find(name)
    }

    fn parameter_from_id(&self, id: ParameterId) -> Option<&ParameterDescriptor> {
        self.common().parameters.descriptor(id)
    }

    fn parameter_descriptors(&self) -> &[ParameterDescriptor] {
        self.common().parameters.descriptors()
    }

    /// Wire the outbound event sink (direct engine queue or the owning
    /// track's internal buffer)
    fn set_event_output(&mut self, sink: Arc<RtEventFifo>) {
        self.common_mut().event_output = Some(sink);
    }

    fn connect_cv_from_parameter(
        &mut self,
        parameter: ParameterId,
        cv_id: usize,
    ) -> Result<(), ProcessorError> {
        self.common_mut().connect_cv_from_parameter(parameter, cv_id)
    }

    fn connect_gate_from_processor(&mut self, gate_id: usize, channel: u8, note: u8) {
        self.common_mut().connect_gate_from_processor(gate_id, channel, note);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectId;

    struct NullProcessor {
        common: ProcessorCommon,
    }

    impl NullProcessor {
        fn new() -> Self {
            let mut common = ProcessorCommon::new(2, 2);
            common.register_parameter(ParameterDescriptor::float("depth", "Depth", 0.0, 0.0, 1.0));
            Self { common }
        }
    }

    impl Processor for NullProcessor {
        fn common(&self) -> &ProcessorCommon {
            &self.common
        }

        fn common_mut(&mut self) -> &mut ProcessorCommon {
            &mut self.common
        }

        fn process_audio(&mut self, _input: &SampleBuffer, output: &mut SampleBuffer) {
            output.clear();
        }
    }

    #[test]
    fn test_identity_assignment() {
        let mut processor = NullProcessor::new();
        assert_eq!(processor.id(), ObjectId::INVALID);

        processor.set_id(ObjectId(3));
        processor.set_name("null");
        assert_eq!(processor.id(), ObjectId(3));
        assert_eq!(processor.name(), "null");
    }

    #[test]
    fn test_channel_maxima_are_fixed() {
        let mut processor = NullProcessor::new();
        assert_eq!(processor.max_input_channels(), 2);

        processor.set_input_channels(1);
        processor.set_output_channels(1);
        assert_eq!(processor.input_channels(), 1);
        assert_eq!(processor.max_input_channels(), 2);
        assert_eq!(processor.max_output_channels(), 2);
    }

    #[test]
    fn test_default_event_application() {
        let mut processor = NullProcessor::new();
        let depth = processor.parameter_from_name("depth").unwrap().id;

        processor.process_event(RtEvent::ParameterChange {
            processor: ObjectId(0),
            offset: 0,
            parameter: depth,
            value: 2.0,
        });
        // Clipped to the parameter range
        assert_eq!(processor.common().parameters().value(depth), 1.0);
        assert_eq!(processor.common().parameters().raw_value(depth), 2.0);
    }

    #[test]
    fn test_cv_out_binding_emits() {
        let mut processor = NullProcessor::new();
        let depth = processor.parameter_from_name("depth").unwrap().id;
        let sink = Arc::new(RtEventFifo::new(16));

        processor.set_event_output(Arc::clone(&sink));
        processor.connect_cv_from_parameter(depth, 2).unwrap();
        processor.common_mut().set_parameter_raw(depth, 0.5);

        match sink.pop() {
            Some(RtEvent::CvOut { cv_id, value }) => {
                assert_eq!(cv_id, 2);
                assert_eq!(value, 0.5);
            }
            other => panic!("expected CvOut, got {other:?}"),
        }
    }

    #[test]
    fn test_gate_out_binding_diverts_notes() {
        let mut processor = NullProcessor::new();
        let sink = Arc::new(RtEventFifo::new(16));
        processor.set_event_output(Arc::clone(&sink));
        processor.connect_gate_from_processor(4, 0, 36);

        let common = processor.common();
        common.output_event(RtEvent::NoteOn {
            processor: ObjectId(0),
            offset: 0,
            channel: 0,
            note: 36,
            velocity: 1.0,
        });
        common.output_event(RtEvent::NoteOff {
            processor: ObjectId(0),
            offset: 0,
            channel: 0,
            note: 37,
            velocity: 0.0,
        });

        match sink.pop() {
            Some(RtEvent::GateOut { gate_id: 4, high: true }) => {}
            other => panic!("expected GateOut, got {other:?}"),
        }
        // Unbound note passes through unchanged
        match sink.pop() {
            Some(RtEvent::NoteOff { note: 37, .. }) => {}
            other => panic!("expected NoteOff, got {other:?}"),
        }
    }
}
