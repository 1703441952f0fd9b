//! Realtime worker pool
//!
//! One worker per extra realtime core. Each worker is pinned to a core,
//! promoted to realtime scheduling and renders its assigned tracks when
//! the audio thread wakes the pool, then decrements the shared busy
//! counter. The audio thread spins on that counter to wait for the pool.
//!
//! Phase discipline: the audio thread only touches tracks and worker
//! assignments while the pool is idle, so every lock taken here is
//! uncontended.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;

use skiff_core::{ObjectId, Processor};

use crate::thread_priority::{ThreadRtGuard, promote_to_realtime};
use crate::timing::PerformanceTimer;
use crate::track::Track;

enum WorkerMessage {
    Render,
    Shutdown,
}

struct WorkerHandle {
    wake_tx: Sender<WorkerMessage>,
    tracks: Arc<Mutex<Vec<Arc<Mutex<Track>>>>>,
    thread: Option<JoinHandle<()>>,
}

pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    busy: Arc<AtomicUsize>,
    next_worker: usize,
}

impl WorkerPool {
    /// Spawn `worker_count` pinned realtime workers
    pub fn new(worker_count: usize, timer: Arc<PerformanceTimer>) -> Self {
        let available_cores = num_cpus::get();
        if worker_count + 1 > available_cores {
            log::warn!(
                "Requested {worker_count} workers on a machine with {available_cores} cores"
            );
        }
        let busy = Arc::new(AtomicUsize::new(0));
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();

        let workers = (0..worker_count)
            .map(|index| {
                let (wake_tx, wake_rx) = bounded::<WorkerMessage>(1);
                let tracks: Arc<Mutex<Vec<Arc<Mutex<Track>>>>> = Arc::new(Mutex::new(Vec::new()));

                let worker_tracks = Arc::clone(&tracks);
                let worker_busy = Arc::clone(&busy);
                let worker_timer = Arc::clone(&timer);
                // Core 0 is left to the audio thread
                let core = core_ids.get(1 + index).copied();

                let thread = std::thread::Builder::new()
                    .name(format!("skiff-worker-{index}"))
                    .spawn(move || {
                        if let Some(core) = core {
                            core_affinity::set_for_current(core);
                        }
                        promote_to_realtime();
                        let _rt = ThreadRtGuard::new();

                        while let Ok(message) = wake_rx.recv() {
                            match message {
                                WorkerMessage::Render => {
                                    let tracks = worker_tracks.lock();
                                    for track in tracks.iter() {
                                        track.lock().render(Some(&worker_timer));
                                    }
                                    drop(tracks);
                                    worker_busy.fetch_sub(1, Ordering::AcqRel);
                                }
                                WorkerMessage::Shutdown => break,
                            }
                        }
                    })
                    .expect("failed to spawn worker thread");

                WorkerHandle { wake_tx, tracks, thread: Some(thread) }
            })
            .collect();

        log::info!("Worker pool started with {worker_count} workers");
        Self { workers, busy, next_worker: 0 }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Assign a track to a worker, round-robin
    pub fn add_track(&mut self, track: Arc<Mutex<Track>>) {
        if self.workers.is_empty() {
            return;
        }
        let worker = &self.workers[self.next_worker % self.workers.len()];
        worker.tracks.lock().push(track);
        self.next_worker += 1;
    }

    /// Drop a track from whichever worker renders it
    pub fn remove_track(&mut self, id: ObjectId) {
        for worker in &self.workers {
            worker.tracks.lock().retain(|track| track.lock().id() != id);
        }
    }

    /// Wake every worker for one block of rendering
    pub fn wakeup_workers(&self) {
        self.busy.store(self.workers.len(), Ordering::Release);
        for worker in &self.workers {
            let _ = worker.wake_tx.send(WorkerMessage::Render);
        }
    }

    /// Spin until every worker finished its tracks
    pub fn wait_for_workers_idle(&self) {
        while self.busy.load(Ordering::Acquire) != 0 {
            std::hint::spin_loop();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            let _ = worker.wake_tx.send(WorkerMessage::Shutdown);
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}
