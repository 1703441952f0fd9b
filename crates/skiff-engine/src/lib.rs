//! skiff-engine: The realtime audio engine
//!
//! Per-block processing pipeline, transport, tracks, the processor
//! registry with its realtime arena, the worker pool and the clip
//! detector. The engine is driven by an audio frontend calling
//! [`AudioEngine::process_chunk`] once per block and controlled from
//! non-realtime threads through its control API.

// Audio code uses explicit indexing where iterators would obscure the
// channel/frame structure
#![allow(clippy::needless_range_loop)]

mod clip_detector;
mod engine;
mod registry;
mod thread_priority;
mod timing;
mod track;
mod transport;
mod worker_pool;

pub use clip_detector::ClipDetector;
pub use engine::{AudioEngine, RealtimeState};
pub use registry::{ProcessorRecord, ProcessorRegistry, RtProcessorArena, RtSlot};
pub use thread_priority::{PriorityResult, is_realtime_context, promote_to_realtime};
pub use timing::{ENGINE_TIMING_ID, PerformanceTimer, ProcessTimings};
pub use track::Track;
pub use transport::Transport;
pub use worker_pool::WorkerPool;

use std::time::Duration;

/// How long an off-thread caller waits for a topology acknowledgement
pub const RT_EVENT_TIMEOUT: Duration = Duration::from_millis(200);

/// Report written on shutdown when timing is enabled
pub const TIMING_FILE_NAME: &str = "timings.txt";
