//! Passthrough plugin
//!
//! Copies audio unchanged and forwards keyboard events to its event
//! output, which makes note flow through a chain observable downstream.

use skiff_core::{Processor, ProcessorCommon, RtEvent, SampleBuffer};

pub struct PassthroughPlugin {
    common: ProcessorCommon,
}

impl PassthroughPlugin {
    pub fn new() -> Self {
        Self { common: ProcessorCommon::new(2, 2) }
    }
}

impl Default for PassthroughPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for PassthroughPlugin {
    fn common(&self) -> &ProcessorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut ProcessorCommon {
        &mut self.common
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let channels = input.channel_count().min(output.channel_count());
        for channel in 0..channels {
            output.copy_channel(channel, channel, input);
        }
        for channel in channels..output.channel_count() {
            output.channel_mut(channel).fill(0.0);
        }
    }

    fn process_event(&mut self, event: RtEvent) {
        if event.is_keyboard() {
            self.common.output_event(event);
        } else {
            self.common.apply_event(event);
        }
    }
}
