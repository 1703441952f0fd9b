//! Delay plugin
//!
//! Plain non-interpolating delay line per channel. The delay rings are
//! allocated in `configure`; rendering never allocates. The effective
//! delay is never shorter than one sample, so a zero "time" setting still
//! shifts the signal by a single frame.

use skiff_core::{
    BLOCK_SIZE, ParameterDescriptor, ParameterId, Processor, ProcessorCommon, Sample, SampleBuffer,
};

const MAX_CHANNELS: usize = 2;
const MAX_DELAY_SECONDS: f32 = 1.0;

pub struct DelayPlugin {
    common: ProcessorCommon,
    time_id: ParameterId,
    rings: Vec<Vec<Sample>>,
    write_pos: usize,
}

impl DelayPlugin {
    pub fn new() -> Self {
        let mut common = ProcessorCommon::new(2, 2);
        let time_id = common.register_parameter(ParameterDescriptor::float(
            "time", "Time", 0.0, 0.0, MAX_DELAY_SECONDS,
        ));
        Self { common, time_id, rings: Vec::new(), write_pos: 0 }
    }

    fn ring_len(&self) -> usize {
        self.rings.first().map_or(0, Vec::len)
    }
}

impl Default for DelayPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for DelayPlugin {
    fn common(&self) -> &ProcessorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut ProcessorCommon {
        &mut self.common
    }

    fn configure(&mut self, sample_rate: f32) {
        self.common.set_sample_rate(sample_rate);
        let ring_len = (sample_rate * MAX_DELAY_SECONDS) as usize + 1;
        self.rings = (0..MAX_CHANNELS).map(|_| vec![0.0; ring_len]).collect();
        self.write_pos = 0;
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let ring_len = self.ring_len();
        if ring_len < 2 {
            output.clear();
            return;
        }

        let time = self.common.parameters().value(self.time_id);
        let delay_samples = ((time * self.common.sample_rate()) as usize)
            .clamp(1, ring_len - 1);

        let channels = input.channel_count().min(output.channel_count()).min(MAX_CHANNELS);
        let start = self.write_pos;
        for channel in 0..channels {
            let ring = &mut self.rings[channel];
            let mut write_pos = start;
            for (out, sample) in output.channel_mut(channel).iter_mut().zip(input.channel(channel)) {
                let read_pos = (write_pos + ring_len - delay_samples) % ring_len;
                *out = ring[read_pos];
                ring[write_pos] = *sample;
                write_pos = (write_pos + 1) % ring_len;
            }
        }
        self.write_pos = (start + BLOCK_SIZE) % ring_len;

        for channel in channels..output.channel_count() {
            output.channel_mut(channel).fill(0.0);
        }
    }
}
