//! Gain plugin

use skiff_core::{ParameterDescriptor, ParameterId, Processor, ProcessorCommon, SampleBuffer};

pub struct GainPlugin {
    common: ProcessorCommon,
    gain_id: ParameterId,
}

impl GainPlugin {
    pub fn new() -> Self {
        let mut common = ProcessorCommon::new(2, 2);
        let gain_id = common.register_parameter(ParameterDescriptor::db(
            "gain", "Gain", 0.0, -120.0, 24.0,
        ));
        Self { common, gain_id }
    }
}

impl Default for GainPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for GainPlugin {
    fn common(&self) -> &ProcessorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut ProcessorCommon {
        &mut self.common
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        // Parameter domain is linear gain, the raw value is in dB
        let gain = self.common.parameters().value(self.gain_id);
        let channels = input.channel_count().min(output.channel_count());
        for channel in 0..channels {
            for (out, sample) in output.channel_mut(channel).iter_mut().zip(input.channel(channel)) {
                *out = sample * gain;
            }
        }
        for channel in channels..output.channel_count() {
            output.channel_mut(channel).fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use skiff_core::{ObjectId, RtEvent};

    #[test]
    fn test_unity_gain_at_zero_db() {
        let mut plugin = GainPlugin::new();
        plugin.init(48_000.0).unwrap();

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.25);
        input.channel_mut(1).fill(0.25);
        let mut output = SampleBuffer::new(2);

        plugin.process_audio(&input, &mut output);
        for channel in 0..2 {
            for sample in output.channel(channel) {
                assert_relative_eq!(*sample, 0.25, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_gain_parameter_in_db() {
        let mut plugin = GainPlugin::new();
        plugin.init(48_000.0).unwrap();
        let gain = plugin.parameter_from_name("gain").unwrap().id;

        plugin.process_event(RtEvent::ParameterChange {
            processor: ObjectId(0),
            offset: 0,
            parameter: gain,
            value: -6.0,
        });

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(1.0);
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);

        assert_relative_eq!(output.channel(0)[0], 0.501, epsilon = 1e-3);
    }
}
