//! Clip detection on engine inputs and outputs
//!
//! Emits at most one notification per channel and direction per
//! detection interval (~500 ms), so sustained clipping is reported
//! without flooding the event plane.

use skiff_core::{BLOCK_SIZE, ClipChannel, RtEvent, RtEventFifo, SampleBuffer};

const DETECTION_INTERVAL_MS: f32 = 500.0;

pub struct ClipDetector {
    interval: u32,
    input_clip_count: Vec<u32>,
    output_clip_count: Vec<u32>,
}

impl ClipDetector {
    pub fn new(sample_rate: f32) -> Self {
        let mut detector = Self { interval: 0, input_clip_count: Vec::new(), output_clip_count: Vec::new() };
        detector.set_sample_rate(sample_rate);
        detector
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.interval = (sample_rate * DETECTION_INTERVAL_MS / 1000.0) as u32 - BLOCK_SIZE as u32;
    }

    /// Counters start saturated so the first clipped block reports
    /// immediately.
    pub fn set_input_channels(&mut self, channels: usize) {
        self.input_clip_count = vec![self.interval; channels];
    }

    pub fn set_output_channels(&mut self, channels: usize) {
        self.output_clip_count = vec![self.interval; channels];
    }

    /// Scan one buffer and push notifications for channels that clipped
    pub fn detect_clipped_samples(&mut self, buffer: &SampleBuffer, queue: &RtEventFifo, audio_input: bool) {
        let (counters, direction) = if audio_input {
            (&mut self.input_clip_count, ClipChannel::Input)
        } else {
            (&mut self.output_clip_count, ClipChannel::Output)
        };

        for channel in 0..buffer.channel_count().min(counters.len()) {
            if buffer.count_clipped_samples(channel) > 0 && counters[channel] >= self.interval {
                let _ = queue.push(RtEvent::ClipNotification { channel, direction });
                counters[channel] = 0;
            } else {
                counters[channel] = counters[channel].saturating_add(BLOCK_SIZE as u32);
            }
        }
    }
}
