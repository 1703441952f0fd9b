//! Low-frequency oscillator
//!
//! A control-rate modulation source: audio passes through untouched, and
//! once per block the oscillator value is written to the read-only `out`
//! parameter. The new value leaves the plugin as a parameter-change event
//! (or, when `out` is bound to a CV output, as a CV event), which makes
//! the LFO usable both as a notification source and as a CV source.

use skiff_core::{
    BLOCK_SIZE, ParameterDescriptor, ParameterId, Processor, ProcessorCommon, RtEvent, SampleBuffer,
};

pub struct LfoPlugin {
    common: ProcessorCommon,
    freq_id: ParameterId,
    out_id: ParameterId,
    phase: f32,
}

impl LfoPlugin {
    pub fn new() -> Self {
        let mut common = ProcessorCommon::new(2, 2);
        let freq_id = common.register_parameter(ParameterDescriptor::float(
            "freq", "Frequency", 1.0, 0.001, 10.0,
        ));
        let out_id = common.register_parameter(ParameterDescriptor::float("out", "Out", 0.5, 0.0, 1.0));
        Self { common, freq_id, out_id, phase: 0.0 }
    }
}

impl Default for LfoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for LfoPlugin {
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

        let sample_rate = self.common.sample_rate();
        if sample_rate <= 0.0 {
            return;
        }

        let freq = self.common.parameters().value(self.freq_id);
        self.phase = (self.phase + freq * BLOCK_SIZE as f32 / sample_rate).fract();
        let value = ((2.0 * std::f32::consts::PI * self.phase).sin() + 1.0) * 0.5;

        self.common.set_parameter_raw(self.out_id, value);
        let processor = self.id();
        self.common.output_event(RtEvent::ParameterChange {
            processor,
            offset: 0,
            parameter: self.out_id,
            value,
        });
    }
}
