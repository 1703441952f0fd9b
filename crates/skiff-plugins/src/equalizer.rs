//! Single-band peaking equalizer
//!
//! Mono in, mono out: one biquad, channel 0 only. Coefficients are
//! recalculated once per block from the current parameter values, which
//! keeps the per-block cpu load predictable.

use skiff_core::{ParameterDescriptor, ParameterId, Processor, ProcessorCommon, Sample, SampleBuffer};

const MIN_Q: f32 = 0.01;

#[derive(Debug, Clone, Copy, Default)]
struct BiquadCoefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

/// Peaking filter coefficients (Audio EQ Cookbook form)
fn calc_biquad_peak(sample_rate: f32, frequency: f32, q: f32, linear_gain: f32) -> BiquadCoefficients {
    let a = linear_gain.sqrt();
    let omega = 2.0 * std::f32::consts::PI * frequency / sample_rate;
    let alpha = omega.sin() / (2.0 * q.max(MIN_Q));
    let cos_omega = omega.cos();

    let a0 = 1.0 + alpha / a;
    BiquadCoefficients {
        b0: (1.0 + alpha * a) / a0,
        b1: -2.0 * cos_omega / a0,
        b2: (1.0 - alpha * a) / a0,
        a1: -2.0 * cos_omega / a0,
        a2: (1.0 - alpha / a) / a0,
    }
}

/// Direct form 2 transposed biquad state
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    s1: f32,
    s2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, c: &BiquadCoefficients, x: Sample) -> Sample {
        let y = c.b0 * x + self.s1;
        self.s1 = c.b1 * x - c.a1 * y + self.s2;
        self.s2 = c.b2 * x - c.a2 * y;
        y
    }
}

pub struct EqualizerPlugin {
    common: ProcessorCommon,
    frequency_id: ParameterId,
    gain_id: ParameterId,
    q_id: ParameterId,
    state: BiquadState,
}

impl EqualizerPlugin {
    pub fn new() -> Self {
        let mut common = ProcessorCommon::new(1, 1);
        let frequency_id = common.register_parameter(ParameterDescriptor::float(
            "frequency", "Frequency", 1000.0, 20.0, 20000.0,
        ));
        let gain_id = common.register_parameter(ParameterDescriptor::db(
            "gain", "Gain", 0.0, -24.0, 24.0,
        ));
        let q_id = common.register_parameter(ParameterDescriptor::float("q", "Q", 1.0, 0.0, 10.0));

        Self { common, frequency_id, gain_id, q_id, state: BiquadState::default() }
    }

    pub fn reset(&mut self) {
        self.state = BiquadState::default();
    }
}

impl Default for EqualizerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for EqualizerPlugin {
    fn common(&self) -> &ProcessorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut ProcessorCommon {
        &mut self.common
    }

    fn configure(&mut self, sample_rate: f32) {
        self.common.set_sample_rate(sample_rate);
        self.reset();
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        if input.channel_count() == 0 || output.channel_count() == 0 {
            output.clear();
            return;
        }

        let params = self.common.parameters();
        let coefficients = calc_biquad_peak(
            self.common.sample_rate(),
            params.value(self.frequency_id),
            params.value(self.q_id),
            params.value(self.gain_id),
        );

        for (out, sample) in output.channel_mut(0).iter_mut().zip(input.channel(0)) {
            *out = self.state.process(&coefficients, *sample);
        }
        for channel in 1..output.channel_count() {
            output.channel_mut(channel).fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use skiff_core::{BLOCK_SIZE, ObjectId, RtEvent};

    #[test]
    fn test_mono_channel_configuration() {
        let plugin = EqualizerPlugin::new();
        assert_eq!(plugin.input_channels(), 1);
        assert_eq!(plugin.output_channels(), 1);
        assert_eq!(plugin.max_input_channels(), 1);
        assert_eq!(plugin.max_output_channels(), 1);
    }

    #[test]
    fn test_unity_at_zero_gain() {
        // With 0 dB of peak gain the filter collapses to a passthrough
        let mut plugin = EqualizerPlugin::new();
        plugin.init(48_000.0).unwrap();

        let mut input = SampleBuffer::new(1);
        for (n, sample) in input.channel_mut(0).iter_mut().enumerate() {
            *sample = (n as f32 * 0.3).sin() * 0.5;
        }
        let mut output = SampleBuffer::new(1);
        plugin.process_audio(&input, &mut output);

        for n in 0..BLOCK_SIZE {
            assert_relative_eq!(output.channel(0)[n], input.channel(0)[n], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_boost_amplifies_centre_frequency() {
        let mut plugin = EqualizerPlugin::new();
        plugin.init(48_000.0).unwrap();
        let frequency = plugin.parameter_from_name("frequency").unwrap().id;
        let gain = plugin.parameter_from_name("gain").unwrap().id;

        plugin.process_event(RtEvent::ParameterChange {
            processor: ObjectId(0),
            offset: 0,
            parameter: frequency,
            value: 1000.0,
        });
        plugin.process_event(RtEvent::ParameterChange {
            processor: ObjectId(0),
            offset: 0,
            parameter: gain,
            value: 12.0,
        });

        // Feed a 1 kHz sine and let the filter settle over several blocks
        let sample_rate = 48_000.0f32;
        let mut phase = 0.0f32;
        let mut input = SampleBuffer::new(1);
        let mut output = SampleBuffer::new(1);
        let mut peak = 0.0f32;
        for _ in 0..32 {
            for sample in input.channel_mut(0).iter_mut() {
                *sample = (2.0 * std::f32::consts::PI * phase).sin() * 0.25;
                phase = (phase + 1000.0 / sample_rate).fract();
            }
            plugin.process_audio(&input, &mut output);
            peak = peak.max(output.peak(0));
        }
        assert!(peak > 0.5, "expected boost above input level, peak = {peak}");
    }

    #[test]
    fn test_wider_buffers_use_channel_zero_only() {
        // A mono processor handed a track-width buffer filters channel 0
        // and leaves silence on the rest
        let mut plugin = EqualizerPlugin::new();
        plugin.init(48_000.0).unwrap();

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.5);
        input.channel_mut(1).fill(0.5);
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);

        assert!(output.channel(0).iter().any(|s| *s != 0.0));
        assert!(output.channel(1).iter().all(|s| *s == 0.0));
    }
}
