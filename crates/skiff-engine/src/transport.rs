//! Musical-time transport
//!
//! Keeps musical time coherent with sample time. Advanced exactly once
//! per block from the audio thread; all external changes arrive either
//! directly (engine stopped) or as realtime events applied at the block
//! boundary so the musical phase is preserved.

use skiff_core::{BLOCK_SIZE, PlayingMode, RtEvent, SyncMode, Time, TimeSignature};

/// Transport state machine. The audio thread is the sole writer while
/// the engine is running.
#[derive(Debug)]
pub struct Transport {
    sample_rate: f32,
    tempo: f32,
    time_signature: TimeSignature,
    playing_mode: PlayingMode,
    sync_mode: SyncMode,
    sample_count: i64,
    current_time: Time,
    beats: f64,
    bar_start_beats: f64,
}

impl Transport {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            tempo: 120.0,
            time_signature: TimeSignature::default(),
            playing_mode: PlayingMode::Stopped,
            sync_mode: SyncMode::Internal,
            sample_count: 0,
            current_time: Time::ZERO,
            beats: 0.0,
            bar_start_beats: 0.0,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    /// Advance to the current block. Called once per block, before any
    /// events are applied or audio is rendered.
    pub fn set_time(&mut self, timestamp: Time, sample_count: i64) {
        self.current_time = timestamp;
        self.sample_count = sample_count;

        if self.playing_mode.is_playing() {
            let beats_per_block =
                f64::from(BLOCK_SIZE as u32) / f64::from(self.sample_rate) * f64::from(self.tempo) / 60.0;
            self.beats += beats_per_block;

            let beats_per_bar = self.time_signature.beats_per_bar();
            while self.beats - self.bar_start_beats >= beats_per_bar {
                self.bar_start_beats += beats_per_bar;
            }
        }
    }

    /// Apply a transport change event at the block boundary
    pub fn process_event(&mut self, event: &RtEvent) -> bool {
        match event {
            RtEvent::Tempo { bpm, .. } => {
                self.tempo = *bpm;
                true
            }
            RtEvent::TimeSignature { signature, .. } => {
                self.time_signature = *signature;
                true
            }
            RtEvent::PlayingMode { mode, .. } => {
                self.apply_playing_mode(*mode);
                true
            }
            RtEvent::SyncMode { mode, .. } => {
                self.sync_mode = *mode;
                true
            }
            _ => false,
        }
    }

    fn apply_playing_mode(&mut self, mode: PlayingMode) {
        if !self.playing_mode.is_playing() && mode.is_playing() {
            self.beats = 0.0;
            self.bar_start_beats = 0.0;
        }
        self.playing_mode = mode;
    }

    // Setters used from the non-realtime side. When the engine is
    // running the change is carried by an event instead and applied in
    // `process_event`.

    pub fn set_tempo(&mut self, tempo: f32, realtime_running: bool) {
        if !realtime_running {
            self.tempo = tempo;
        }
    }

    pub fn set_time_signature(&mut self, signature: TimeSignature, realtime_running: bool) {
        if !realtime_running {
            self.time_signature = signature;
        }
    }

    pub fn set_playing_mode(&mut self, mode: PlayingMode, realtime_running: bool) {
        if !realtime_running {
            self.apply_playing_mode(mode);
        }
    }

    pub fn set_sync_mode(&mut self, mode: SyncMode, realtime_running: bool) {
        if !realtime_running {
            self.sync_mode = mode;
        }
    }

    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn playing_mode(&self) -> PlayingMode {
        self.playing_mode
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    /// Beat position since playback started
    pub fn beats(&self) -> f64 {
        self.beats
    }

    /// Beat position within the current bar
    pub fn bar_beats(&self) -> f64 {
        self.beats - self.bar_start_beats
    }

    pub fn current_time(&self) -> Time {
        self.current_time
    }

    pub fn sample_count(&self) -> i64 {
        self.sample_count
    }
}
