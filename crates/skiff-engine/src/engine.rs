//! The audio engine
//!
//! Drives the per-block pipeline, routes events between the non-realtime
//! and realtime domains and exposes the control API.
//!
//! ## Domains
//!
//! The engine is shared (`Arc<AudioEngine>`) between the audio frontend,
//! the dispatcher and any number of client threads. Control-plane state
//! (registry, queues, state flag) is independently thread-safe. The
//! realtime domain (processor arena, graph order, transport, connection
//! tables, worker pool) lives behind a mutex that the audio thread
//! `try_lock`s at the top of every block. While realtime is running the
//! control plane never takes that mutex, so the audio thread never
//! waits; while stopped, the control plane mutates the realtime
//! structures through it directly instead of sending events.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use skiff_core::{
    BLOCK_SIZE, ControlBuffer, EngineConfig, EngineError, EngineResult, MAX_ENGINE_GATE_NOTE_NO,
    MAX_ENGINE_GATE_PORTS, ObjectId, ParameterId, PlayingMode, Processor, ProcessorBox, RtEvent,
    RtEventFifo, SampleBuffer, SyncMode, TRACK_MAX_BUSSES, Time, TimeSignature,
};
use skiff_plugins::{PluginLoader, PluginRegistry, PluginSpec, PluginType};

use crate::clip_detector::ClipDetector;
use crate::registry::{ProcessorRegistry, RtProcessorArena, RtSlot};
use crate::thread_priority::ThreadRtGuard;
use crate::timing::{ENGINE_TIMING_ID, PerformanceTimer};
use crate::track::Track;
use crate::transport::Transport;
use crate::worker_pool::WorkerPool;
use crate::{RT_EVENT_TIMEOUT, TIMING_FILE_NAME};

/// Engine realtime state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RealtimeState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl RealtimeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Block-boundary state transition
fn update_state(current: RealtimeState) -> RealtimeState {
    match current {
        RealtimeState::Starting => RealtimeState::Running,
        RealtimeState::Stopping => RealtimeState::Stopped,
        other => other,
    }
}

#[derive(Debug, Clone, Copy)]
struct AudioConnection {
    engine_channel: usize,
    track_channel: usize,
    track: ObjectId,
}

#[derive(Debug, Clone, Copy)]
struct CvConnection {
    processor: ObjectId,
    parameter: ParameterId,
    cv_id: usize,
}

#[derive(Debug, Clone, Copy)]
struct GateConnection {
    processor: ObjectId,
    gate_id: usize,
    note: u8,
    channel: u8,
}

/// State owned by the audio thread (and, while stopped, mutated directly
/// by the control plane)
struct RtDomain {
    arena: RtProcessorArena,
    /// Track ids in render order
    graph: Vec<ObjectId>,
    /// Internal event buffers of the tracks in the graph, drained
    /// without touching the track locks while workers render
    track_event_buffers: Vec<(ObjectId, Arc<RtEventFifo>)>,
    transport: Transport,
    clip_detector: ClipDetector,
    worker_pool: Option<WorkerPool>,
    in_audio_connections: Vec<AudioConnection>,
    out_audio_connections: Vec<AudioConnection>,
    cv_in_routes: Vec<CvConnection>,
    gate_in_routes: Vec<GateConnection>,
    prev_gate_values: u64,
    outgoing_gate_values: u64,
}

/// Collects topology acknowledgements from `control_out` for off-thread
/// waiters. Removed processors return to the non-realtime domain here
/// and are dropped off the audio thread.
struct AckReceiver {
    control_out: Arc<RtEventFifo>,
    received: Mutex<Vec<(u64, bool)>>,
}

impl AckReceiver {
    const POLL_PERIOD: Duration = Duration::from_millis(1);

    fn new(control_out: Arc<RtEventFifo>) -> Self {
        Self { control_out, received: Mutex::new(Vec::new()) }
    }

    /// Poll for the acknowledgement with the given correlation id.
    /// Returns the `handled` flag, or false on timeout.
    fn wait_for(&self, correlation_id: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut received = self.received.lock();
                while let Some(event) = self.control_out.pop() {
                    if let RtEvent::TopologyAck { correlation_id: id, handled, returned } = event {
                        drop(returned);
                        received.push((id, handled));
                    }
                }
                if let Some(position) =
                    received.iter().position(|(id, _)| *id == correlation_id)
                {
                    return received.swap_remove(position).1;
                }
            }
            if Instant::now() >= deadline {
                log::warn!("Timed out waiting for acknowledgement of event {correlation_id}");
                return false;
            }
            std::thread::sleep(Self::POLL_PERIOD);
        }
    }
}

pub struct AudioEngine {
    config: EngineConfig,
    registry: ProcessorRegistry,
    plugins: RwLock<PluginRegistry>,
    rt: Mutex<RtDomain>,
    state: AtomicU8,
    main_in: Arc<RtEventFifo>,
    main_out: Arc<RtEventFifo>,
    internal_control: Arc<RtEventFifo>,
    control_out: Arc<RtEventFifo>,
    processor_out: Arc<RtEventFifo>,
    /// Producer-side guard for `internal_control`; any client thread may
    /// submit through `send_async_event`
    in_queue_lock: Mutex<()>,
    ack_receiver: AckReceiver,
    timer: Arc<PerformanceTimer>,
    /// Owning handles of all live tracks; the arena and workers hold
    /// clones, so the final drop always happens off the audio thread
    tracks: Mutex<HashMap<ObjectId, Arc<Mutex<Track>>>>,
    /// Handoff of freshly created tracks to the audio thread
    track_staging: Mutex<Vec<Arc<Mutex<Track>>>>,
    next_correlation: AtomicU64,
    multicore: bool,
}

impl AudioEngine {
    pub fn new(config: EngineConfig) -> Self {
        let timer = Arc::new(PerformanceTimer::new());
        timer.set_timing_period(config.sample_rate);
        timer.enable(config.timing_enabled);

        let transport = Transport::new(config.sample_rate);
        let mut clip_detector = ClipDetector::new(config.sample_rate);
        clip_detector.set_input_channels(config.audio_input_channels);
        clip_detector.set_output_channels(config.audio_output_channels);

        let multicore = config.rt_cores > 1;
        let worker_pool =
            multicore.then(|| WorkerPool::new(config.rt_cores - 1, Arc::clone(&timer)));

        let control_out = Arc::new(RtEventFifo::default());
        log::info!(
            "Audio engine created at {} Hz with {} rt cores",
            config.sample_rate,
            config.rt_cores
        );

        Self {
            config,
            registry: ProcessorRegistry::new(),
            plugins: RwLock::new(PluginRegistry::new()),
            rt: Mutex::new(RtDomain {
                arena: RtProcessorArena::new(),
                graph: Vec::new(),
                track_event_buffers: Vec::new(),
                transport,
                clip_detector,
                worker_pool,
                in_audio_connections: Vec::new(),
                out_audio_connections: Vec::new(),
                cv_in_routes: Vec::new(),
                gate_in_routes: Vec::new(),
                prev_gate_values: 0,
                outgoing_gate_values: 0,
            }),
            state: AtomicU8::new(RealtimeState::Stopped as u8),
            main_in: Arc::new(RtEventFifo::default()),
            main_out: Arc::new(RtEventFifo::default()),
            internal_control: Arc::new(RtEventFifo::default()),
            control_out: Arc::clone(&control_out),
            processor_out: Arc::new(RtEventFifo::default()),
            in_queue_lock: Mutex::new(()),
            ack_receiver: AckReceiver::new(control_out),
            timer,
            tracks: Mutex::new(HashMap::new()),
            track_staging: Mutex::new(Vec::new()),
            next_correlation: AtomicU64::new(1),
            multicore,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Queue the dispatcher and MIDI/driver frontends produce into
    /// (single producer at a time)
    pub fn main_in_queue(&self) -> Arc<RtEventFifo> {
        Arc::clone(&self.main_in)
    }

    /// Queue carrying notifications out of the engine (single consumer)
    pub fn main_out_queue(&self) -> Arc<RtEventFifo> {
        Arc::clone(&self.main_out)
    }

    // ── State machine ───────────────────────────────────────────────────

    pub fn state(&self) -> RealtimeState {
        RealtimeState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RealtimeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// True for any non-stopped state
    pub fn realtime(&self) -> bool {
        self.state() != RealtimeState::Stopped
    }

    pub fn enable_realtime(&self, enabled: bool) {
        if enabled {
            self.set_state(RealtimeState::Starting);
        } else if self.realtime() {
            let correlation_id = self.next_correlation();
            let _ = self.send_async_event(RtEvent::StopEngine { correlation_id });
        } else {
            self.set_state(RealtimeState::Stopped);
        }
    }

    fn next_correlation(&self) -> u64 {
        self.next_correlation.fetch_add(1, Ordering::Relaxed)
    }

    /// Submit an event to the engine from any non-realtime thread
    pub fn send_async_event(&self, event: RtEvent) -> EngineResult<()> {
        self.send_async_event_raw(event).map_err(|_| EngineError::QueueFull)
    }

    fn send_async_event_raw(&self, event: RtEvent) -> Result<(), RtEvent> {
        let _guard = self.in_queue_lock.lock();
        self.internal_control.push(event)
    }

    // ── Per-block pipeline ──────────────────────────────────────────────

    /// Process one block. Called by the audio driver frontend, once per
    /// buffer period, from its realtime thread.
    pub fn process_chunk(
        &self,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        in_controls: &ControlBuffer,
        out_controls: &mut ControlBuffer,
        timestamp: Time,
        sample_count: i64,
    ) {
        let _rt_flag = ThreadRtGuard::new();
        let engine_started = self.timer.start();

        let Some(mut rt_guard) = self.rt.try_lock() else {
            // The control plane is reconfiguring a stopped engine
            output.clear();
            return;
        };
        let rt = &mut *rt_guard;

        rt.transport.set_time(timestamp, sample_count);

        while let Some(event) = self.internal_control.pop() {
            self.send_rt_event(rt, event);
        }
        while let Some(event) = self.main_in.pop() {
            self.send_rt_event(rt, event);
        }

        if self.config.cv_input_channels > 0 {
            self.route_cv_gate_ins(rt, in_controls);
        }

        let state = self.state();

        if self.config.input_clip_detection {
            rt.clip_detector.detect_clipped_samples(input, &self.main_out, true);
        }
        Self::copy_audio_to_tracks(rt, input);

        if rt.worker_pool.is_some() {
            if let Some(pool) = &rt.worker_pool {
                pool.wakeup_workers();
            }
            // Buffered events from tracks that already finished are
            // pumped while the rest of the pool still renders
            self.retrieve_events_from_tracks(rt, out_controls);
            if let Some(pool) = &rt.worker_pool {
                pool.wait_for_workers_idle();
            }
            self.retrieve_events_from_tracks(rt, out_controls);
        } else {
            for index in 0..rt.graph.len() {
                let id = rt.graph[index];
                if let Some(track) = rt.arena.track(id) {
                    track.lock().render(Some(&self.timer));
                }
            }
            let queue = Arc::clone(&self.processor_out);
            self.process_outgoing_events(rt, out_controls, &queue);
        }

        let _ = self.main_out.push(RtEvent::SynchronisationMarker {
            beats: rt.transport.beats(),
            time: rt.transport.current_time(),
        });
        Self::copy_audio_from_tracks(rt, output);
        self.set_state(update_state(state));

        if self.config.output_clip_detection {
            rt.clip_detector.detect_clipped_samples(output, &self.main_out, false);
        }
        self.timer.stop(engine_started, ENGINE_TIMING_ID);
    }

    /// Route one event on the audio thread: topology and transport
    /// events are handled by the engine itself, everything else goes to
    /// the processor it addresses.
    fn send_rt_event(&self, rt: &mut RtDomain, event: RtEvent) {
        let Some(event) = self.handle_internal_event(rt, event) else {
            return;
        };
        let Some(id) = event.processor_id() else {
            return;
        };
        if Self::with_processor_mut(rt, id, |processor| processor.process_event(event)).is_none() {
            log::warn!("Invalid processor id {id}, event dropped");
        }
    }

    /// Run a closure against the live processor with the given id,
    /// wherever it currently lives (arena slot or a track's chain)
    fn with_processor_mut<R>(
        rt: &mut RtDomain,
        id: ObjectId,
        f: impl FnOnce(&mut dyn Processor) -> R,
    ) -> Option<R> {
        enum Target {
            Plugin,
            InTrack(ObjectId),
            Track(Arc<Mutex<Track>>),
        }

        let target = match rt.arena.get(id)? {
            RtSlot::Plugin(_) => Target::Plugin,
            RtSlot::InTrack(track_id) => Target::InTrack(*track_id),
            RtSlot::Track(track) => Target::Track(Arc::clone(track)),
        };

        match target {
            Target::Plugin => match rt.arena.get_mut(id) {
                Some(RtSlot::Plugin(plugin)) => Some(f(plugin.as_mut())),
                _ => None,
            },
            Target::InTrack(track_id) => {
                let track = rt.arena.track(track_id)?;
                let mut guard = track.lock();
                guard.child_mut(id).map(f)
            }
            Target::Track(track) => {
                let mut guard = track.lock();
                Some(f(&mut *guard))
            }
        }
    }

    /// Handle topology and transport events. Returns the event back when
    /// it is not an internal one.
    fn handle_internal_event(&self, rt: &mut RtDomain, event: RtEvent) -> Option<RtEvent> {
        if rt.transport.process_event(&event) {
            return None;
        }
        match event {
            RtEvent::StopEngine { correlation_id } => {
                self.set_state(RealtimeState::Stopping);
                self.push_ack(correlation_id, true, None);
            }
            RtEvent::InsertProcessor { correlation_id, processor } => {
                let ProcessorBox(plugin) = processor;
                let id = plugin.id();
                match rt.arena.insert(id, RtSlot::Plugin(plugin)) {
                    Ok(()) => self.push_ack(correlation_id, true, None),
                    Err(RtSlot::Plugin(plugin)) => {
                        self.push_ack(correlation_id, false, Some(ProcessorBox(plugin)));
                    }
                    Err(_) => self.push_ack(correlation_id, false, None),
                }
            }
            RtEvent::RemoveProcessor { correlation_id, processor } => {
                match rt.arena.remove(processor) {
                    Some(RtSlot::Plugin(plugin)) => {
                        self.push_ack(correlation_id, true, Some(ProcessorBox(plugin)));
                    }
                    Some(other) => {
                        rt.arena.replace(processor, other);
                        self.push_ack(correlation_id, false, None);
                    }
                    None => self.push_ack(correlation_id, false, None),
                }
            }
            RtEvent::AddProcessorToTrack { correlation_id, processor, track } => {
                let handled = Self::add_processor_to_track_rt(rt, processor, track);
                self.push_ack(correlation_id, handled, None);
            }
            RtEvent::RemoveProcessorFromTrack { correlation_id, processor, track } => {
                let handled = Self::remove_processor_from_track_rt(rt, processor, track);
                self.push_ack(correlation_id, handled, None);
            }
            RtEvent::AddTrack { correlation_id, track } => {
                let handled = self.add_track_rt(rt, track);
                self.push_ack(correlation_id, handled, None);
            }
            RtEvent::RemoveTrack { correlation_id, track } => {
                let handled = Self::remove_track_rt(rt, track);
                self.push_ack(correlation_id, handled, None);
            }
            other => return Some(other),
        }
        None
    }

    fn push_ack(&self, correlation_id: u64, handled: bool, returned: Option<ProcessorBox>) {
        let _ = self.control_out.push(RtEvent::TopologyAck { correlation_id, handled, returned });
    }

    fn add_processor_to_track_rt(
        rt: &mut RtDomain,
        processor_id: ObjectId,
        track_id: ObjectId,
    ) -> bool {
        let Some(track) = rt.arena.track(track_id) else {
            return false;
        };
        match rt.arena.remove(processor_id) {
            Some(RtSlot::Plugin(plugin)) => match track.lock().add(plugin) {
                Ok(()) => {
                    let _ = rt.arena.insert(processor_id, RtSlot::InTrack(track_id));
                    true
                }
                Err(plugin) => {
                    let _ = rt.arena.insert(processor_id, RtSlot::Plugin(plugin));
                    false
                }
            },
            Some(other) => {
                let _ = rt.arena.insert(processor_id, other);
                false
            }
            None => false,
        }
    }

    fn remove_processor_from_track_rt(
        rt: &mut RtDomain,
        processor_id: ObjectId,
        track_id: ObjectId,
    ) -> bool {
        let Some(track) = rt.arena.track(track_id) else {
            return false;
        };
        match track.lock().remove(processor_id) {
            Some(plugin) => {
                rt.arena.replace(processor_id, RtSlot::Plugin(plugin));
                true
            }
            None => false,
        }
    }

    fn add_track_rt(&self, rt: &mut RtDomain, track_id: ObjectId) -> bool {
        let staged = {
            let mut staging = self.track_staging.lock();
            let position = staging.iter().position(|t| t.lock().id() == track_id);
            position.map(|p| staging.swap_remove(p))
        };
        let Some(track) = staged else {
            return false;
        };
        if rt.arena.insert(track_id, RtSlot::Track(Arc::clone(&track))).is_err() {
            return false;
        }
        rt.graph.push(track_id);
        rt.track_event_buffers.push((track_id, track.lock().output_event_buffer()));
        if let Some(pool) = &mut rt.worker_pool {
            pool.add_track(track);
        }
        true
    }

    fn remove_track_rt(rt: &mut RtDomain, track_id: ObjectId) -> bool {
        if rt.arena.track(track_id).is_none() {
            return false;
        }
        rt.graph.retain(|id| *id != track_id);
        rt.track_event_buffers.retain(|(id, _)| *id != track_id);
        if let Some(pool) = &mut rt.worker_pool {
            pool.remove_track(track_id);
        }
        // Drops the arena's clone only; the owning handle lives in the
        // non-realtime track map
        rt.arena.remove(track_id);
        true
    }

    // ── CV/gate routing ─────────────────────────────────────────────────

    fn route_cv_gate_ins(&self, rt: &mut RtDomain, in_controls: &ControlBuffer) {
        for index in 0..rt.cv_in_routes.len() {
            let route = rt.cv_in_routes[index];
            let value = in_controls.cv_values[route.cv_id];
            self.send_rt_event(
                rt,
                RtEvent::ParameterChange {
                    processor: route.processor,
                    offset: 0,
                    parameter: route.parameter,
                    value,
                },
            );
        }

        // Gate transitions show up as set bits in the xor with the
        // previous block's word
        let gate_diffs = rt.prev_gate_values ^ in_controls.gate_values;
        if gate_diffs != 0 {
            for index in 0..rt.gate_in_routes.len() {
                let route = rt.gate_in_routes[index];
                if gate_diffs & (1 << route.gate_id) == 0 {
                    continue;
                }
                let high = in_controls.gate_values & (1 << route.gate_id) != 0;
                let event = if high {
                    RtEvent::NoteOn {
                        processor: route.processor,
                        offset: 0,
                        channel: route.channel,
                        note: route.note,
                        velocity: 1.0,
                    }
                } else {
                    RtEvent::NoteOff {
                        processor: route.processor,
                        offset: 0,
                        channel: route.channel,
                        note: route.note,
                        velocity: 1.0,
                    }
                };
                self.send_rt_event(rt, event);
            }
        }
        rt.prev_gate_values = in_controls.gate_values;
    }

    // ── Audio copy ──────────────────────────────────────────────────────

    fn copy_audio_to_tracks(rt: &mut RtDomain, input: &SampleBuffer) {
        for index in 0..rt.graph.len() {
            let id = rt.graph[index];
            if let Some(track) = rt.arena.track(id) {
                track.lock().input_buffer_mut().clear();
            }
        }
        for connection in &rt.in_audio_connections {
            if let Some(track) = rt.arena.track(connection.track) {
                track.lock().input_buffer_mut().copy_channel(
                    connection.engine_channel,
                    connection.track_channel,
                    input,
                );
            }
        }
    }

    fn copy_audio_from_tracks(rt: &mut RtDomain, output: &mut SampleBuffer) {
        output.clear();
        for connection in &rt.out_audio_connections {
            if let Some(track) = rt.arena.track(connection.track) {
                let guard = track.lock();
                output.add_channel(
                    connection.track_channel,
                    connection.engine_channel,
                    guard.output_buffer(),
                );
            }
        }
    }

    // ── Outgoing events ─────────────────────────────────────────────────

    fn retrieve_events_from_tracks(&self, rt: &mut RtDomain, out_controls: &mut ControlBuffer) {
        for index in 0..rt.track_event_buffers.len() {
            let buffer = Arc::clone(&rt.track_event_buffers[index].1);
            self.process_outgoing_events(rt, out_controls, &buffer);
        }
    }

    fn process_outgoing_events(
        &self,
        rt: &mut RtDomain,
        out_controls: &mut ControlBuffer,
        source_queue: &RtEventFifo,
    ) {
        while let Some(event) = source_queue.pop() {
            match event {
                RtEvent::CvOut { cv_id, value } => {
                    if cv_id < self.config.cv_output_channels {
                        out_controls.cv_values[cv_id] = value;
                    }
                }
                RtEvent::GateOut { gate_id, high } => {
                    if gate_id < MAX_ENGINE_GATE_PORTS {
                        if high {
                            rt.outgoing_gate_values |= 1 << gate_id;
                        } else {
                            rt.outgoing_gate_values &= !(1 << gate_id);
                        }
                    }
                }
                other => {
                    let _ = self.main_out.push(other);
                }
            }
        }
        out_controls.gate_values = rt.outgoing_gate_values;
    }

    // ── Track lifecycle ─────────────────────────────────────────────────

    pub fn create_track(&self, name: &str, channel_count: usize) -> EngineResult<()> {
        if channel_count > 2 {
            log::error!("Invalid number of channels for new track");
            return Err(EngineError::InvalidNChannels);
        }
        self.register_new_track(name, Track::new(channel_count))
    }

    pub fn create_multibus_track(
        &self,
        name: &str,
        input_busses: usize,
        output_busses: usize,
    ) -> EngineResult<()> {
        if input_busses > TRACK_MAX_BUSSES || output_busses > TRACK_MAX_BUSSES {
            log::error!("Invalid number of busses for new track");
            return Err(EngineError::InvalidNChannels);
        }
        self.register_new_track(name, Track::new_multibus(input_busses, output_busses))
    }

    fn register_new_track(&self, name: &str, mut track: Track) -> EngineResult<()> {
        track.init(self.config.sample_rate).map_err(|_| EngineError::Error)?;
        let id = self.registry.register(
            name,
            track.parameter_descriptors().to_vec(),
            true,
            track.input_channels(),
            track.output_channels(),
        )?;
        track.set_id(id);
        track.set_name(name);

        // Under worker parallelism tracks buffer their events internally;
        // pushing straight to the shared queue would race
        if self.multicore {
            track.set_event_output_internal();
        } else {
            track.set_event_output(Arc::clone(&self.processor_out));
        }

        let track = Arc::new(Mutex::new(track));
        self.tracks.lock().insert(id, Arc::clone(&track));
        self.track_staging.lock().push(Arc::clone(&track));

        let added = if self.realtime() {
            let correlation_id = self.next_correlation();
            match self.send_async_event(RtEvent::AddTrack { correlation_id, track: id }) {
                Ok(()) => self.ack_receiver.wait_for(correlation_id, RT_EVENT_TIMEOUT),
                Err(_) => false,
            }
        } else {
            let mut rt = self.rt.lock();
            self.add_track_rt(&mut rt, id)
        };

        if !added {
            log::error!("Failed to insert track {name} into the processing part");
            self.track_staging.lock().retain(|t| t.lock().id() != id);
            self.tracks.lock().remove(&id);
            let _ = self.registry.deregister(name);
            return Err(EngineError::InvalidProcessor);
        }
        log::info!("Track {name} successfully added to engine");
        Ok(())
    }

    pub fn delete_track(&self, name: &str) -> EngineResult<()> {
        let record = self.registry.track_record(name)?;
        if self.realtime() {
            let correlation_id = self.next_correlation();
            self.send_async_event(RtEvent::RemoveTrack { correlation_id, track: record.id })?;
            if !self.ack_receiver.wait_for(correlation_id, RT_EVENT_TIMEOUT) {
                log::error!("Failed to remove track {name} from the processing part");
            }
        } else {
            let mut rt = self.rt.lock();
            if !Self::remove_track_rt(&mut rt, record.id) {
                return Err(EngineError::InvalidTrack);
            }
        }
        // The final owning handle drops here, off the audio thread
        self.tracks.lock().remove(&record.id);
        self.registry.deregister(name).map(|_| ())
    }

    // ── Plugin lifecycle ────────────────────────────────────────────────

    pub fn register_plugin_loader(&self, plugin_type: PluginType, loader: Box<dyn PluginLoader>) {
        self.plugins.write().register_loader(plugin_type, loader);
    }

    pub fn add_plugin_to_track(
        &self,
        track_name: &str,
        plugin_uid: &str,
        plugin_name: &str,
        plugin_path: &str,
        plugin_type: PluginType,
    ) -> EngineResult<()> {
        let track_record = self.registry.track_record(track_name)?;
        let spec = PluginSpec {
            uid: plugin_uid.to_string(),
            name: plugin_name.to_string(),
            path: plugin_path.to_string(),
            plugin_type,
        };
        let mut plugin = self.plugins.read().create(&spec).map_err(|error| {
            log::error!("Failed to load plugin {plugin_uid}: {error}");
            EngineError::InvalidPluginUid
        })?;
        if let Err(error) = plugin.init(self.config.sample_rate) {
            log::error!("Failed to initialize plugin {plugin_name}: {error}");
            return Err(EngineError::InvalidPluginUid);
        }
        let id = self.registry.register(
            plugin_name,
            plugin.parameter_descriptors().to_vec(),
            false,
            plugin.input_channels(),
            plugin.output_channels(),
        )?;
        plugin.set_id(id);
        plugin.set_name(plugin_name);
        plugin.set_enabled(true);

        if self.realtime() {
            let insert_id = self.next_correlation();
            if self
                .send_async_event(RtEvent::InsertProcessor {
                    correlation_id: insert_id,
                    processor: ProcessorBox(plugin),
                })
                .is_err()
            {
                let _ = self.registry.deregister(plugin_name);
                return Err(EngineError::QueueFull);
            }
            let inserted = self.ack_receiver.wait_for(insert_id, RT_EVENT_TIMEOUT);

            let add_id = self.next_correlation();
            let added = inserted
                && self
                    .send_async_event(RtEvent::AddProcessorToTrack {
                        correlation_id: add_id,
                        processor: id,
                        track: track_record.id,
                    })
                    .is_ok()
                && self.ack_receiver.wait_for(add_id, RT_EVENT_TIMEOUT);
            if !inserted || !added {
                log::error!("Failed to insert/add processor {plugin_name} to processing part");
                let _ = self.registry.deregister(plugin_name);
                return Err(EngineError::InvalidProcessor);
            }
        } else {
            let mut rt = self.rt.lock();
            if rt.arena.insert(id, RtSlot::Plugin(plugin)).is_err() {
                let _ = self.registry.deregister(plugin_name);
                return Err(EngineError::Error);
            }
            if !Self::add_processor_to_track_rt(&mut rt, id, track_record.id) {
                rt.arena.remove(id);
                let _ = self.registry.deregister(plugin_name);
                return Err(EngineError::Error);
            }
        }
        Ok(())
    }

    pub fn remove_plugin_from_track(
        &self,
        track_name: &str,
        plugin_name: &str,
    ) -> EngineResult<()> {
        let track_record = self.registry.track_record(track_name)?;
        let plugin_record =
            self.registry.record(plugin_name).ok_or(EngineError::InvalidPluginName)?;

        if self.realtime() {
            let remove_id = self.next_correlation();
            let delete_id = self.next_correlation();
            self.send_async_event(RtEvent::RemoveProcessorFromTrack {
                correlation_id: remove_id,
                processor: plugin_record.id,
                track: track_record.id,
            })?;
            self.send_async_event(RtEvent::RemoveProcessor {
                correlation_id: delete_id,
                processor: plugin_record.id,
            })?;
            let removed = self.ack_receiver.wait_for(remove_id, RT_EVENT_TIMEOUT);
            let deleted = self.ack_receiver.wait_for(delete_id, RT_EVENT_TIMEOUT);
            if !removed || !deleted {
                log::error!("Failed to remove/delete processor {plugin_name} from processing part");
            }
        } else {
            let mut rt = self.rt.lock();
            if !Self::remove_processor_from_track_rt(&mut rt, plugin_record.id, track_record.id) {
                log::error!("Failed to remove processor {plugin_name} from track {track_name}");
            }
            rt.arena.remove(plugin_record.id);
        }
        self.registry.deregister(plugin_name).map(|_| ())
    }

    // ── Audio routing ───────────────────────────────────────────────────

    fn connection_tables_mutable(&self) -> EngineResult<parking_lot::MutexGuard<'_, RtDomain>> {
        if self.realtime() {
            log::error!("Audio and cv/gate routing can only change while the engine is stopped");
            return Err(EngineError::Error);
        }
        Ok(self.rt.lock())
    }

    pub fn connect_audio_input_channel(
        &self,
        input_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        let record = self.registry.track_record(track_name)?;
        if input_channel >= self.config.audio_input_channels
            || track_channel >= record.input_channels
        {
            return Err(EngineError::InvalidChannel);
        }
        let mut rt = self.connection_tables_mutable()?;
        rt.in_audio_connections.push(AudioConnection {
            engine_channel: input_channel,
            track_channel,
            track: record.id,
        });
        log::info!(
            "Connected input {input_channel} to channel {track_channel} of track \"{track_name}\""
        );
        Ok(())
    }

    pub fn connect_audio_output_channel(
        &self,
        output_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        let record = self.registry.track_record(track_name)?;
        if output_channel >= self.config.audio_output_channels
            || track_channel >= record.output_channels
        {
            return Err(EngineError::InvalidChannel);
        }
        let mut rt = self.connection_tables_mutable()?;
        rt.out_audio_connections.push(AudioConnection {
            engine_channel: output_channel,
            track_channel,
            track: record.id,
        });
        log::info!(
            "Connected channel {track_channel} of track \"{track_name}\" to output {output_channel}"
        );
        Ok(())
    }

    /// Connect a stereo input bus (pair of channels) to a track bus
    pub fn connect_audio_input_bus(
        &self,
        input_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        self.connect_audio_input_channel(input_bus * 2, track_bus * 2, track_name)?;
        self.connect_audio_input_channel(input_bus * 2 + 1, track_bus * 2 + 1, track_name)
    }

    /// Connect a track bus to a stereo output bus
    pub fn connect_audio_output_bus(
        &self,
        output_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        self.connect_audio_output_channel(output_bus * 2, track_bus * 2, track_name)?;
        self.connect_audio_output_channel(output_bus * 2 + 1, track_bus * 2 + 1, track_name)
    }

    // ── CV/gate routing ─────────────────────────────────────────────────

    pub fn connect_cv_to_parameter(
        &self,
        processor_name: &str,
        parameter_name: &str,
        cv_input_id: usize,
    ) -> EngineResult<()> {
        if cv_input_id >= self.config.cv_input_channels {
            return Err(EngineError::InvalidChannel);
        }
        let record = self.registry.record(processor_name).ok_or(EngineError::InvalidProcessor)?;
        let parameter = record
            .parameters
            .iter()
            .find(|p| p.name == parameter_name)
            .ok_or(EngineError::InvalidParameter)?
            .id;
        let mut rt = self.connection_tables_mutable()?;
        rt.cv_in_routes.push(CvConnection { processor: record.id, parameter, cv_id: cv_input_id });
        log::info!(
            "Connected cv input {cv_input_id} to parameter {parameter_name} on {processor_name}"
        );
        Ok(())
    }

    pub fn connect_cv_from_parameter(
        &self,
        processor_name: &str,
        parameter_name: &str,
        cv_output_id: usize,
    ) -> EngineResult<()> {
        if cv_output_id >= self.config.cv_output_channels {
            return Err(EngineError::Error);
        }
        let record = self.registry.record(processor_name).ok_or(EngineError::InvalidProcessor)?;
        let parameter = record
            .parameters
            .iter()
            .find(|p| p.name == parameter_name)
            .ok_or(EngineError::InvalidParameter)?
            .id;
        let mut rt = self.connection_tables_mutable()?;
        let connected =
            Self::with_processor_mut(&mut rt, record.id, |processor| {
                processor.connect_cv_from_parameter(parameter, cv_output_id)
            });
        match connected {
            Some(Ok(())) => {
                log::info!(
                    "Connected parameter {parameter_name} on {processor_name} to cv output {cv_output_id}"
                );
                Ok(())
            }
            Some(Err(_)) => Err(EngineError::Error),
            None => Err(EngineError::InvalidProcessor),
        }
    }

    pub fn connect_gate_to_processor(
        &self,
        processor_name: &str,
        gate_input_id: usize,
        note_no: u8,
        channel: u8,
    ) -> EngineResult<()> {
        if gate_input_id >= MAX_ENGINE_GATE_PORTS || note_no > MAX_ENGINE_GATE_NOTE_NO {
            return Err(EngineError::Error);
        }
        let record = self.registry.record(processor_name).ok_or(EngineError::InvalidProcessor)?;
        let mut rt = self.connection_tables_mutable()?;
        rt.gate_in_routes.push(GateConnection {
            processor: record.id,
            gate_id: gate_input_id,
            note: note_no,
            channel,
        });
        log::info!(
            "Connected gate input {gate_input_id} to processor {processor_name} on channel {channel}"
        );
        Ok(())
    }

    pub fn connect_gate_from_processor(
        &self,
        processor_name: &str,
        gate_output_id: usize,
        note_no: u8,
        channel: u8,
    ) -> EngineResult<()> {
        if gate_output_id >= MAX_ENGINE_GATE_PORTS || note_no > MAX_ENGINE_GATE_NOTE_NO {
            return Err(EngineError::Error);
        }
        let record = self.registry.record(processor_name).ok_or(EngineError::InvalidProcessor)?;
        let mut rt = self.connection_tables_mutable()?;
        let connected = Self::with_processor_mut(&mut rt, record.id, |processor| {
            processor.connect_gate_from_processor(gate_output_id, channel, note_no);
        });
        match connected {
            Some(()) => {
                log::info!(
                    "Connected processor {processor_name} to gate output {gate_output_id} from channel {channel}"
                );
                Ok(())
            }
            None => Err(EngineError::InvalidProcessor),
        }
    }

    // ── Transport ───────────────────────────────────────────────────────

    pub fn set_tempo(&self, tempo: f32) -> EngineResult<()> {
        if self.realtime() {
            self.send_async_event(RtEvent::Tempo { offset: 0, bpm: tempo })
        } else {
            self.rt.lock().transport.set_tempo(tempo, false);
            Ok(())
        }
    }

    pub fn set_time_signature(&self, signature: TimeSignature) -> EngineResult<()> {
        if self.realtime() {
            self.send_async_event(RtEvent::TimeSignature { offset: 0, signature })
        } else {
            self.rt.lock().transport.set_time_signature(signature, false);
            Ok(())
        }
    }

    pub fn set_transport_mode(&self, mode: PlayingMode) -> EngineResult<()> {
        if self.realtime() {
            self.send_async_event(RtEvent::PlayingMode { offset: 0, mode })
        } else {
            self.rt.lock().transport.set_playing_mode(mode, false);
            Ok(())
        }
    }

    pub fn set_tempo_sync_mode(&self, mode: SyncMode) -> EngineResult<()> {
        if self.realtime() {
            self.send_async_event(RtEvent::SyncMode { offset: 0, mode })
        } else {
            self.rt.lock().transport.set_sync_mode(mode, false);
            Ok(())
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn processor_id_from_name(&self, name: &str) -> EngineResult<ObjectId> {
        self.registry.processor_id_from_name(name)
    }

    pub fn processor_name_from_id(&self, id: ObjectId) -> EngineResult<String> {
        self.registry.processor_name_from_id(id)
    }

    pub fn parameter_id_from_name(
        &self,
        processor_name: &str,
        parameter_name: &str,
    ) -> EngineResult<ParameterId> {
        self.registry.parameter_id_from_name(processor_name, parameter_name)
    }

    pub fn parameter_name_from_id(
        &self,
        processor_name: &str,
        parameter_id: ParameterId,
    ) -> EngineResult<String> {
        self.registry.parameter_name_from_id(processor_name, parameter_id)
    }

    // ── Timings ─────────────────────────────────────────────────────────

    pub fn print_timings_to_log(&self) {
        if !self.timer.enabled() {
            return;
        }
        let rt = self.rt.lock();
        for id in &rt.graph {
            if let Some(track) = rt.arena.track(*id) {
                let guard = track.lock();
                if let Some(timings) = self.timer.timings_for_node(id.as_index()) {
                    log::info!(
                        "Track: {} ({}), avg: {}%, min: {}%, max: {}%",
                        id,
                        guard.name(),
                        timings.avg_case * 100.0,
                        timings.min_case * 100.0,
                        timings.max_case * 100.0
                    );
                }
            }
        }
        if let Some(timings) = self.timer.timings_for_node(ENGINE_TIMING_ID) {
            log::info!(
                "Engine total: avg: {}%, min: {}%, max: {}%",
                timings.avg_case * 100.0,
                timings.min_case * 100.0,
                timings.max_case * 100.0
            );
        }
    }

    /// Write the per-processor timing report
    pub fn print_timings_to_file(&self, path: &Path) -> std::io::Result<()> {
        let mut report = String::new();
        self.write_timings_report(&mut report);
        let mut file = std::fs::File::create(path)?;
        file.write_all(report.as_bytes())
    }

    fn write_timings_report(&self, out: &mut String) {
        use std::fmt::Write as _;

        let period_us = 1_000_000.0 / self.config.sample_rate * BLOCK_SIZE as f32;
        let _ = writeln!(
            out,
            "Performance timings for all processors in percentages of audio buffer (100% = {period_us}us)\n"
        );
        let _ = writeln!(
            out,
            "{:<24}{:<16}{:<16}{:<16}",
            "", "average(%)", "minimum(%)", "maximum(%)"
        );

        let write_node = |out: &mut String, timer: &PerformanceTimer, id: usize| {
            if let Some(timings) = timer.timings_for_node(id) {
                let _ = writeln!(
                    out,
                    "{:<16.3}{:<16.3}{:<16.3}",
                    timings.avg_case * 100.0,
                    timings.min_case * 100.0,
                    timings.max_case * 100.0
                );
            } else {
                let _ = writeln!(out);
            }
        };

        let rt = self.rt.lock();
        for id in &rt.graph {
            let Some(track) = rt.arena.track(*id) else {
                continue;
            };
            let guard = track.lock();
            let _ = writeln!(out, "Track: {}", guard.name());
            for (name, child_id) in guard.chain_info() {
                let _ = write!(out, "{:<8}{:<16}", "", name);
                write_node(out, &self.timer, child_id.as_index());
            }
            let _ = write!(out, "{:<8}{:<16}", "", "Track total");
            write_node(out, &self.timer, id.as_index());
            let _ = writeln!(out);
        }
        let _ = write!(out, "{:<24}", "Engine total");
        write_node(out, &self.timer, ENGINE_TIMING_ID);
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if self.timer.enabled() {
            self.timer.enable(false);
            if let Err(error) = self.print_timings_to_file(Path::new(TIMING_FILE_NAME)) {
                log::warn!("Couldn't write timings to file: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use skiff_core::{BLOCK_SIZE, ClipChannel};
    use skiff_plugins::uids;

    fn engine_with(config: EngineConfig) -> AudioEngine {
        AudioEngine::new(config)
    }

    fn engine() -> AudioEngine {
        engine_with(EngineConfig::default())
    }

    fn run_block(engine: &AudioEngine, input: &SampleBuffer, block: i64) -> SampleBuffer {
        let mut output = SampleBuffer::new(engine.config().audio_output_channels);
        let in_controls = ControlBuffer::default();
        let mut out_controls = ControlBuffer::default();
        engine.process_chunk(
            input,
            &mut output,
            &in_controls,
            &mut out_controls,
            Time::from_millis(block as u64),
            block * BLOCK_SIZE as i64,
        );
        output
    }

    fn drain_main_out(engine: &AudioEngine) -> Vec<RtEvent> {
        let mut events = Vec::new();
        while let Some(event) = engine.main_out_queue().pop() {
            events.push(event);
        }
        events
    }

    fn stereo_passthrough_setup(engine: &AudioEngine, track: &str) {
        engine.create_track(track, 2).unwrap();
        engine.connect_audio_input_channel(0, 0, track).unwrap();
        engine.connect_audio_input_channel(1, 1, track).unwrap();
        engine.connect_audio_output_channel(0, 0, track).unwrap();
        engine.connect_audio_output_channel(1, 1, track).unwrap();
    }

    #[test]
    fn test_track_with_unity_gain_is_transparent() {
        let engine = engine();
        stereo_passthrough_setup(&engine, "lead");
        engine
            .add_plugin_to_track("lead", uids::GAIN, "gain_0", "", PluginType::Internal)
            .unwrap();

        let mut input = SampleBuffer::new(2);
        for (n, sample) in input.channel_mut(0).iter_mut().enumerate() {
            *sample = (n as f32 * 0.1).sin() * 0.5;
        }
        input.channel_mut(1).fill(-0.25);

        let output = run_block(&engine, &input, 0);
        for channel in 0..2 {
            for n in 0..BLOCK_SIZE {
                assert_relative_eq!(
                    output.channel(channel)[n],
                    input.channel(channel)[n],
                    epsilon = 1e-6
                );
            }
        }
    }

    #[test]
    fn test_delay_plugin_shifts_by_one_sample() {
        let engine = engine();
        stereo_passthrough_setup(&engine, "delayed");
        engine
            .add_plugin_to_track("delayed", uids::DELAY, "adelay", "", PluginType::Internal)
            .unwrap();

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(1.0);
        input.channel_mut(1).fill(1.0);

        let output = run_block(&engine, &input, 0);
        assert_eq!(output.channel(0)[0], 0.0);
        assert_eq!(output.channel(1)[0], 0.0);
        assert_eq!(output.channel(0)[1], 1.0);
        assert_eq!(output.channel(1)[1], 1.0);
    }

    #[test]
    fn test_sync_markers_follow_tempo() {
        let engine = engine();
        engine.set_tempo(120.0).unwrap();
        engine.set_transport_mode(PlayingMode::Playing).unwrap();

        let input = SampleBuffer::new(2);
        run_block(&engine, &input, 0);
        run_block(&engine, &input, 1);

        let beats: Vec<f64> = drain_main_out(&engine)
            .into_iter()
            .filter_map(|event| match event {
                RtEvent::SynchronisationMarker { beats, .. } => Some(beats),
                _ => None,
            })
            .collect();
        assert_eq!(beats.len(), 2);

        // 120 bpm = 2 beats per second
        let expected = BLOCK_SIZE as f64 / f64::from(engine.config().sample_rate) * 2.0;
        assert_relative_eq!(beats[1] - beats[0], expected, epsilon = 1e-9);
    }

    #[test]
    fn test_cv_input_routes_to_parameter() {
        let mut config = EngineConfig::default();
        config.cv_input_channels = 1;
        let engine = engine_with(config);
        engine.create_track("mod", 2).unwrap();
        engine
            .add_plugin_to_track("mod", uids::DELAY, "delay", "", PluginType::Internal)
            .unwrap();
        engine.connect_cv_to_parameter("delay", "time", 0).unwrap();

        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        let mut in_controls = ControlBuffer::default();
        in_controls.cv_values[0] = 0.5;
        let mut out_controls = ControlBuffer::default();
        engine.process_chunk(&input, &mut output, &in_controls, &mut out_controls, Time::ZERO, 0);

        let delay_id = engine.processor_id_from_name("delay").unwrap();
        let time_id = engine.parameter_id_from_name("delay", "time").unwrap();
        let mut rt = engine.rt.lock();
        let value =
            AudioEngine::with_processor_mut(&mut rt, delay_id, |processor| {
                processor.common().parameters().value(time_id)
            })
            .unwrap();
        assert_eq!(value, 0.5);
    }

    #[test]
    fn test_gate_transitions_become_note_events() {
        let mut config = EngineConfig::default();
        config.cv_input_channels = 1; // cv/gate routing runs when cv inputs exist
        let engine = engine_with(config);
        engine.create_track("synth", 2).unwrap();
        engine
            .add_plugin_to_track("synth", uids::PASSTHROUGH, "fwd", "", PluginType::Internal)
            .unwrap();
        engine.connect_gate_to_processor("fwd", 0, 60, 0).unwrap();

        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        let mut in_controls = ControlBuffer::default();
        let mut out_controls = ControlBuffer::default();

        in_controls.set_gate(0, true);
        engine.process_chunk(&input, &mut output, &in_controls, &mut out_controls, Time::ZERO, 0);
        let on_events: Vec<_> = drain_main_out(&engine)
            .into_iter()
            .filter(|e| matches!(e, RtEvent::NoteOn { note: 60, .. }))
            .collect();
        assert_eq!(on_events.len(), 1, "exactly one note-on per gate transition");

        // Unchanged gate word produces no further notes
        engine.process_chunk(&input, &mut output, &in_controls, &mut out_controls, Time::ZERO, 64);
        assert!(
            drain_main_out(&engine).iter().all(|e| !e.is_keyboard()),
            "no note without a transition"
        );

        in_controls.set_gate(0, false);
        engine.process_chunk(&input, &mut output, &in_controls, &mut out_controls, Time::ZERO, 128);
        let off_events: Vec<_> = drain_main_out(&engine)
            .into_iter()
            .filter(|e| matches!(e, RtEvent::NoteOff { note: 60, .. }))
            .collect();
        assert_eq!(off_events.len(), 1);
    }

    #[test]
    fn test_input_clip_detection_rate_limited() {
        let mut config = EngineConfig::default();
        config.input_clip_detection = true;
        let engine = engine_with(config);

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(1.5);
        run_block(&engine, &input, 0);
        run_block(&engine, &input, 1);

        let clips: Vec<_> = drain_main_out(&engine)
            .into_iter()
            .filter(|event| {
                matches!(
                    event,
                    RtEvent::ClipNotification { channel: 0, direction: ClipChannel::Input }
                )
            })
            .collect();
        assert_eq!(clips.len(), 1, "one notification per 500 ms window");
    }

    #[test]
    fn test_state_machine_transitions() {
        let engine = engine();
        assert_eq!(engine.state(), RealtimeState::Stopped);
        assert!(!engine.realtime());

        engine.enable_realtime(true);
        assert_eq!(engine.state(), RealtimeState::Starting);
        assert!(engine.realtime());

        let input = SampleBuffer::new(2);
        run_block(&engine, &input, 0);
        assert_eq!(engine.state(), RealtimeState::Running);

        engine.enable_realtime(false);
        assert_eq!(engine.state(), RealtimeState::Running);

        // The stop event is drained at the top of the next block and the
        // state settles at its end
        run_block(&engine, &input, 1);
        assert_eq!(engine.state(), RealtimeState::Stopped);
    }

    #[test]
    fn test_add_plugin_while_running() {
        let engine = Arc::new(engine());
        stereo_passthrough_setup(&engine, "live");
        engine.enable_realtime(true);

        // Pump blocks the way a driver frontend would
        let pump_engine = Arc::clone(&engine);
        let pump = std::thread::spawn(move || {
            let input = SampleBuffer::new(2);
            let mut block = 0i64;
            while pump_engine.realtime() {
                run_block(&pump_engine, &input, block);
                block += 1;
                std::thread::sleep(Duration::from_micros(200));
            }
        });

        let result =
            engine.add_plugin_to_track("live", uids::GAIN, "live_gain", "", PluginType::Internal);
        assert_eq!(result, Ok(()));
        assert!(engine.processor_id_from_name("live_gain").is_ok());

        let removed = engine.remove_plugin_from_track("live", "live_gain");
        assert_eq!(removed, Ok(()));
        assert!(engine.processor_id_from_name("live_gain").is_err());

        engine.enable_realtime(false);
        pump.join().unwrap();
    }

    #[test]
    fn test_create_and_delete_track_while_running() {
        let engine = Arc::new(engine());
        engine.enable_realtime(true);

        let pump_engine = Arc::clone(&engine);
        let pump = std::thread::spawn(move || {
            let input = SampleBuffer::new(2);
            let mut block = 0i64;
            while pump_engine.realtime() {
                run_block(&pump_engine, &input, block);
                block += 1;
                std::thread::sleep(Duration::from_micros(200));
            }
        });

        assert_eq!(engine.create_track("dynamic", 2), Ok(()));
        assert!(engine.processor_id_from_name("dynamic").is_ok());
        assert_eq!(engine.delete_track("dynamic"), Ok(()));
        assert!(engine.processor_id_from_name("dynamic").is_err());

        engine.enable_realtime(false);
        pump.join().unwrap();
    }

    #[test]
    fn test_multicore_rendering_matches_serial() {
        let mut config = EngineConfig::default();
        config.rt_cores = 2;
        let engine = engine_with(config);
        stereo_passthrough_setup(&engine, "parallel");
        engine
            .add_plugin_to_track("parallel", uids::GAIN, "gain", "", PluginType::Internal)
            .unwrap();

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.5);
        input.channel_mut(1).fill(-0.5);

        let output = run_block(&engine, &input, 0);
        assert_eq!(output.channel(0)[0], 0.5);
        assert_eq!(output.channel(1)[0], -0.5);
    }

    #[test]
    fn test_validation_failures() {
        let engine = engine();
        assert_eq!(engine.create_track("too_wide", 3), Err(EngineError::InvalidNChannels));
        assert_eq!(
            engine.create_multibus_track("busses", TRACK_MAX_BUSSES + 1, 1),
            Err(EngineError::InvalidNChannels)
        );
        assert_eq!(
            engine.connect_audio_input_channel(0, 0, "missing"),
            Err(EngineError::InvalidTrack)
        );
        assert_eq!(engine.delete_track("missing"), Err(EngineError::InvalidTrack));

        engine.create_track("track", 2).unwrap();
        assert_eq!(
            engine.connect_audio_input_channel(7, 0, "track"),
            Err(EngineError::InvalidChannel)
        );
        assert_eq!(
            engine.add_plugin_to_track("track", "skiff.unknown", "p", "", PluginType::Internal),
            Err(EngineError::InvalidPluginUid)
        );
        assert_eq!(
            engine.add_plugin_to_track("track", "uid", "p", "", PluginType::Vst3),
            Err(EngineError::InvalidPluginUid)
        );
        // Duplicate track names are rejected
        assert_eq!(engine.create_track("track", 2), Err(EngineError::InvalidProcessor));
    }

    #[test]
    fn test_timings_report() {
        let mut config = EngineConfig::default();
        config.timing_enabled = true;
        let engine = engine_with(config);
        stereo_passthrough_setup(&engine, "timed");
        engine
            .add_plugin_to_track("timed", uids::GAIN, "timed_gain", "", PluginType::Internal)
            .unwrap();

        let input = SampleBuffer::new(2);
        for block in 0..4 {
            run_block(&engine, &input, block);
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timings.txt");
        engine.print_timings_to_file(&path).unwrap();
        let report = std::fs::read_to_string(&path).unwrap();

        assert!(report.contains("Track: timed"));
        assert!(report.contains("timed_gain"));
        assert!(report.contains("Track total"));
        assert!(report.contains("Engine total"));

        // Disable so the drop impl does not rewrite the file in cwd
        engine.timer.enable(false);
    }
}
