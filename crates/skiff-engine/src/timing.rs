//! Per-node processing-time measurement
//!
//! Records how long each processor, track and the engine itself spend
//! per block, as a fraction of the block period
//! (100% = `BLOCK_SIZE / sample_rate`). Updates are plain atomic
//! stores from the audio and worker threads; reports are assembled
//! off-thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use skiff_core::{BLOCK_SIZE, MAX_RT_PROCESSORS};

/// Timing slot for the engine total, one past the processor id range
pub const ENGINE_TIMING_ID: usize = MAX_RT_PROCESSORS;

/// Aggregated timings for one node, as fractions of the block period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessTimings {
    pub avg_case: f32,
    pub min_case: f32,
    pub max_case: f32,
}

#[derive(Debug)]
struct TimingNode {
    sum_ns: AtomicU64,
    count: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl TimingNode {
    fn new() -> Self {
        Self {
            sum_ns: AtomicU64::new(0),
            count: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }

    fn record(&self, elapsed_ns: u64) {
        self.sum_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.min_ns.fetch_min(elapsed_ns, Ordering::Relaxed);
        self.max_ns.fetch_max(elapsed_ns, Ordering::Relaxed);
    }
}

pub struct PerformanceTimer {
    enabled: AtomicBool,
    period_ns: AtomicU64,
    nodes: Vec<TimingNode>,
}

impl PerformanceTimer {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            period_ns: AtomicU64::new(0),
            nodes: (0..=MAX_RT_PROCESSORS).map(|_| TimingNode::new()).collect(),
        }
    }

    pub fn enable(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_timing_period(&self, sample_rate: f32) {
        let period = BLOCK_SIZE as f64 / f64::from(sample_rate) * 1e9;
        self.period_ns.store(period as u64, Ordering::Relaxed);
    }

    /// Start a measurement; `None` when timing is disabled
    #[inline]
    pub fn start(&self) -> Option<Instant> {
        self.enabled().then(Instant::now)
    }

    /// Finish a measurement for the node with the given timing id
    #[inline]
    pub fn stop(&self, started: Option<Instant>, id: usize) {
        if let Some(started) = started {
            if let Some(node) = self.nodes.get(id) {
                node.record(started.elapsed().as_nanos() as u64);
            }
        }
    }

    pub fn timings_for_node(&self, id: usize) -> Option<ProcessTimings> {
        let node = self.nodes.get(id)?;
        let count = node.count.load(Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        let period = self.period_ns.load(Ordering::Relaxed).max(1) as f32;
        Some(ProcessTimings {
            avg_case: (node.sum_ns.load(Ordering::Relaxed) / count) as f32 / period,
            min_case: node.min_ns.load(Ordering::Relaxed) as f32 / period,
            max_case: node.max_ns.load(Ordering::Relaxed) as f32 / period,
        })
    }

    pub fn clear(&self) {
        for node in &self.nodes {
            node.sum_ns.store(0, Ordering::Relaxed);
            node.count.store(0, Ordering::Relaxed);
            node.min_ns.store(u64::MAX, Ordering::Relaxed);
            node.max_ns.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for PerformanceTimer {
    fn default() -> Self {
        Self::new()
    }
}
