//! The event dispatcher
//!
//! A non-realtime control thread on a coarse poll period. Each cycle it
//! drains the posted control events, translating them into realtime
//! events pushed to the engine's `main_in` queue, and drains the
//! engine's `main_out` queue, translating realtime notifications into
//! [`NotificationEvent`]s published to subscribed listeners.
//!
//! The dispatcher holds a shared reference to the engine for name/id
//! resolution; the engine knows nothing about the dispatcher (it only
//! owns the queues the dispatcher consumes), so there is no cycle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use skiff_core::{ObjectId, ParameterId, RtEvent, RtEventFifo, Time};
use skiff_engine::AudioEngine;

use crate::event::{
    AsyncWorkEvent, ControlEvent, ControlEventKind, EventListener, EventStatus, KeyboardEvent,
    KeyboardSubtype, NotificationEvent, ParameterAddress, ParameterChangeEvent, ParameterValue,
    ProcessorAddress,
};

/// Poll period of the dispatcher thread
pub const DISPATCHER_POLL_PERIOD: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherStatus {
    Ok,
    AlreadySubscribed,
}

struct DispatcherCore {
    engine: Arc<AudioEngine>,
    in_queue: Mutex<VecDeque<ControlEvent>>,
    main_in: Arc<RtEventFifo>,
    main_out: Arc<RtEventFifo>,
    keyboard_listeners: Mutex<Vec<Arc<dyn EventListener>>>,
    parameter_listeners: Mutex<Vec<Arc<dyn EventListener>>>,
    /// Musical timestamp of the last synchronisation marker; stamps
    /// outgoing notifications
    block_time: Mutex<Time>,
}

impl DispatcherCore {
    fn drain_control_events(&self) {
        loop {
            let event = self.in_queue.lock().pop_front();
            let Some(event) = event else {
                return;
            };
            let status = self.handle_control_event(event.kind);
            if let Some(completion) = event.completion {
                completion(status);
            }
        }
    }

    fn handle_control_event(&self, kind: ControlEventKind) -> EventStatus {
        match kind {
            ControlEventKind::Keyboard(event) => self.handle_keyboard_event(event),
            ControlEventKind::ParameterChange(event) => self.handle_parameter_change(event),
            ControlEventKind::AsyncWork(event) => self.handle_async_work(event),
        }
    }

    fn handle_keyboard_event(&self, event: KeyboardEvent) -> EventStatus {
        let Ok(processor) = self.engine.processor_id_from_name(&event.processor_name) else {
            log::warn!("Keyboard event addressed to unknown processor {}", event.processor_name);
            return EventStatus::NotHandled;
        };
        let offset = 0;
        let rt_event = match event.subtype {
            KeyboardSubtype::NoteOn => RtEvent::NoteOn {
                processor,
                offset,
                channel: event.channel,
                note: event.note,
                velocity: event.velocity,
            },
            KeyboardSubtype::NoteOff => RtEvent::NoteOff {
                processor,
                offset,
                channel: event.channel,
                note: event.note,
                velocity: event.velocity,
            },
            KeyboardSubtype::NoteAftertouch => RtEvent::NoteAftertouch {
                processor,
                offset,
                channel: event.channel,
                note: event.note,
                value: event.velocity,
            },
            KeyboardSubtype::PitchBend => RtEvent::PitchBend {
                processor,
                offset,
                channel: event.channel,
                value: event.value,
            },
            KeyboardSubtype::PolyAftertouch | KeyboardSubtype::RawMidi => {
                return EventStatus::NotHandled;
            }
        };
        match self.main_in.push(rt_event) {
            Ok(()) => EventStatus::HandledOk,
            Err(_) => EventStatus::QueueFull,
        }
    }

    fn handle_parameter_change(&self, event: ParameterChangeEvent) -> EventStatus {
        let processor_name = match &event.processor {
            ProcessorAddress::Name(name) => name.clone(),
            ProcessorAddress::Id(id) => match self.engine.processor_name_from_id(*id) {
                Ok(name) => name,
                Err(_) => return EventStatus::NotHandled,
            },
        };
        let Ok(processor) = self.engine.processor_id_from_name(&processor_name) else {
            return EventStatus::NotHandled;
        };
        let parameter = match &event.parameter {
            ParameterAddress::Id(id) => *id,
            ParameterAddress::Name(name) => {
                match self.engine.parameter_id_from_name(&processor_name, name) {
                    Ok(id) => id,
                    Err(_) => return EventStatus::NotHandled,
                }
            }
        };

        let offset = 0;
        let rt_event = match event.value {
            ParameterValue::Float(value) => {
                RtEvent::ParameterChange { processor, offset, parameter, value }
            }
            ParameterValue::Int(value) => {
                RtEvent::IntParameterChange { processor, offset, parameter, value }
            }
            ParameterValue::Bool(value) => {
                RtEvent::BoolParameterChange { processor, offset, parameter, value }
            }
            ParameterValue::String(value) => RtEvent::StringPropertyChange {
                processor,
                offset,
                parameter,
                value: value.into_boxed_str(),
            },
            ParameterValue::Blob(value) => RtEvent::BlobPropertyChange {
                processor,
                offset,
                parameter,
                value: value.into_boxed_slice(),
            },
        };
        match self.main_in.push(rt_event) {
            Ok(()) => EventStatus::HandledOk,
            Err(_) => EventStatus::QueueFull,
        }
    }

    fn handle_async_work(&self, event: AsyncWorkEvent) -> EventStatus {
        let status = (event.callback)(event.event_id);
        let completion = RtEvent::AsyncWorkCompletion {
            processor: event.processor,
            event_id: event.event_id,
            status,
        };
        match self.main_in.push(completion) {
            Ok(()) => EventStatus::HandledOk,
            Err(_) => EventStatus::QueueFull,
        }
    }

    fn drain_rt_events(&self) {
        while let Some(event) = self.main_out.pop() {
            self.handle_rt_event(event);
        }
    }

    fn handle_rt_event(&self, event: RtEvent) {
        match event {
            RtEvent::NoteOn { processor, channel, note, velocity, .. } => {
                self.publish_keyboard(processor, KeyboardSubtype::NoteOn, channel, note, velocity);
            }
            RtEvent::NoteOff { processor, channel, note, velocity, .. } => {
                self.publish_keyboard(processor, KeyboardSubtype::NoteOff, channel, note, velocity);
            }
            RtEvent::NoteAftertouch { processor, channel, note, value, .. } => {
                self.publish_keyboard(
                    processor,
                    KeyboardSubtype::NoteAftertouch,
                    channel,
                    note,
                    value,
                );
            }
            RtEvent::ParameterChange { processor, parameter, value, .. } => {
                self.publish_parameter(processor, parameter, value);
            }
            RtEvent::IntParameterChange { processor, parameter, value, .. } => {
                self.publish_parameter(processor, parameter, value as f32);
            }
            RtEvent::BoolParameterChange { processor, parameter, value, .. } => {
                self.publish_parameter(processor, parameter, if value { 1.0 } else { 0.0 });
            }
            RtEvent::SynchronisationMarker { time, .. } => {
                *self.block_time.lock() = time;
            }
            RtEvent::ClipNotification { channel, direction } => {
                log::warn!("Audio clipped on {direction:?} channel {channel}");
            }
            RtEvent::AsyncWork { processor, event_id, callback } => {
                let _ = self.handle_async_work(AsyncWorkEvent { processor, event_id, callback });
            }
            _ => {}
        }
    }

    fn publish_keyboard(
        &self,
        processor: ObjectId,
        subtype: KeyboardSubtype,
        channel: u8,
        note: u8,
        velocity: f32,
    ) {
        let Ok(processor_name) = self.engine.processor_name_from_id(processor) else {
            return;
        };
        let notification = NotificationEvent::Keyboard {
            processor_name,
            subtype,
            channel,
            note,
            velocity,
            timestamp: *self.block_time.lock(),
        };
        for listener in self.keyboard_listeners.lock().iter() {
            listener.process(&notification);
        }
    }

    fn publish_parameter(&self, processor: ObjectId, parameter: ParameterId, value: f32) {
        let Ok(processor_name) = self.engine.processor_name_from_id(processor) else {
            return;
        };
        let Ok(parameter_name) = self.engine.parameter_name_from_id(&processor_name, parameter)
        else {
            return;
        };
        let notification = NotificationEvent::ParameterChange {
            processor_name,
            parameter_name,
            value,
            timestamp: *self.block_time.lock(),
        };
        for listener in self.parameter_listeners.lock().iter() {
            listener.process(&notification);
        }
    }
}

/// Subscribe, translate, publish. One instance per engine.
pub struct EventDispatcher {
    core: Arc<DispatcherCore>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    pub fn new(engine: Arc<AudioEngine>) -> Self {
        let main_in = engine.main_in_queue();
        let main_out = engine.main_out_queue();
        Self {
            core: Arc::new(DispatcherCore {
                engine,
                in_queue: Mutex::new(VecDeque::new()),
                main_in,
                main_out,
                keyboard_listeners: Mutex::new(Vec::new()),
                parameter_listeners: Mutex::new(Vec::new()),
                block_time: Mutex::new(Time::ZERO),
            }),
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    /// Start the control thread
    pub fn run(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let core = Arc::clone(&self.core);
        let running = Arc::clone(&self.running);
        let handle = std::thread::Builder::new()
            .name("skiff-dispatcher".to_string())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    let cycle_start = Instant::now();
                    core.drain_control_events();
                    core.drain_rt_events();
                    let elapsed = cycle_start.elapsed();
                    if elapsed < DISPATCHER_POLL_PERIOD {
                        std::thread::sleep(DISPATCHER_POLL_PERIOD - elapsed);
                    }
                }
            })
            .expect("failed to spawn dispatcher thread");
        *self.thread.lock() = Some(handle);
    }

    /// Stop and join the control thread
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Post a control event; the dispatcher takes ownership
    pub fn post_event(&self, event: ControlEvent) {
        self.core.in_queue.lock().push_back(event);
    }

    pub fn subscribe_to_keyboard_events(&self, listener: Arc<dyn EventListener>) -> DispatcherStatus {
        Self::subscribe(&self.core.keyboard_listeners, listener)
    }

    pub fn subscribe_to_parameter_change_notifications(
        &self,
        listener: Arc<dyn EventListener>,
    ) -> DispatcherStatus {
        Self::subscribe(&self.core.parameter_listeners, listener)
    }

    fn subscribe(
        listeners: &Mutex<Vec<Arc<dyn EventListener>>>,
        listener: Arc<dyn EventListener>,
    ) -> DispatcherStatus {
        let mut listeners = listeners.lock();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return DispatcherStatus::AlreadySubscribed;
        }
        listeners.push(listener);
        DispatcherStatus::Ok
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::{BLOCK_SIZE, ControlBuffer, EngineConfig, SampleBuffer};
    use skiff_plugins::{PluginType, uids};

    struct Recorder {
        events: Mutex<Vec<NotificationEvent>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self { events: Mutex::new(Vec::new()) })
        }

        fn take(&self) -> Vec<NotificationEvent> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl EventListener for Recorder {
        fn process(&self, event: &NotificationEvent) {
            self.events.lock().push(event.clone());
        }
    }

    fn engine_with_synth() -> Arc<AudioEngine> {
        let engine = Arc::new(AudioEngine::new(EngineConfig::default()));
        engine.create_track("main", 2).unwrap();
        engine
            .add_plugin_to_track("main", uids::PASSTHROUGH, "synth", "", PluginType::Internal)
            .unwrap();
        engine
    }

    fn pump_block(engine: &AudioEngine, block: i64) {
        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        let in_controls = ControlBuffer::default();
        let mut out_controls = ControlBuffer::default();
        engine.process_chunk(
            &input,
            &mut output,
            &in_controls,
            &mut out_controls,
            Time::ZERO,
            block * BLOCK_SIZE as i64,
        );
    }

    #[test]
    fn test_unknown_receiver_is_not_handled() {
        let engine = Arc::new(AudioEngine::new(EngineConfig::default()));
        let dispatcher = EventDispatcher::new(engine);

        let status = dispatcher
            .core
            .handle_control_event(ControlEventKind::Keyboard(KeyboardEvent::note_on(
                "nobody", 0, 60, 1.0,
            )));
        assert_eq!(status, EventStatus::NotHandled);
    }

    #[test]
    fn test_note_on_reaches_main_out_within_a_block() {
        let engine = engine_with_synth();
        let dispatcher = EventDispatcher::new(Arc::clone(&engine));

        let status = dispatcher.core.handle_control_event(ControlEventKind::Keyboard(
            KeyboardEvent::note_on("synth", 0, 60, 1.0),
        ));
        assert_eq!(status, EventStatus::HandledOk);

        pump_block(&engine, 0);

        let mut found = false;
        while let Some(event) = engine.main_out_queue().pop() {
            if let RtEvent::NoteOn { note, velocity, .. } = event {
                assert_eq!(note, 60);
                assert_eq!(velocity, 1.0);
                found = true;
            }
        }
        assert!(found, "note-on did not appear in main_out");
    }

    #[test]
    fn test_keyboard_notification_published_to_listener() {
        let engine = engine_with_synth();
        let dispatcher = EventDispatcher::new(Arc::clone(&engine));
        let recorder = Recorder::new();
        assert_eq!(
            dispatcher.subscribe_to_keyboard_events(recorder.clone()),
            DispatcherStatus::Ok
        );

        dispatcher.core.handle_control_event(ControlEventKind::Keyboard(KeyboardEvent::note_on(
            "synth", 0, 64, 0.7,
        )));
        pump_block(&engine, 0);
        dispatcher.core.drain_rt_events();

        let events = recorder.take();
        assert!(events.iter().any(|event| matches!(
            event,
            NotificationEvent::Keyboard {
                processor_name,
                subtype: KeyboardSubtype::NoteOn,
                note: 64,
                ..
            } if processor_name == "synth"
        )));
    }

    #[test]
    fn test_parameter_change_by_name_and_notification() {
        let engine = Arc::new(AudioEngine::new(EngineConfig::default()));
        engine.create_track("fx", 2).unwrap();
        engine
            .add_plugin_to_track("fx", uids::LFO, "wobble", "", PluginType::Internal)
            .unwrap();
        let dispatcher = EventDispatcher::new(Arc::clone(&engine));
        let recorder = Recorder::new();
        dispatcher.subscribe_to_parameter_change_notifications(recorder.clone());

        let status = dispatcher.core.handle_control_event(ControlEventKind::ParameterChange(
            ParameterChangeEvent {
                processor: ProcessorAddress::Name("wobble".to_string()),
                parameter: ParameterAddress::Name("freq".to_string()),
                value: ParameterValue::Float(2.5),
            },
        ));
        assert_eq!(status, EventStatus::HandledOk);

        // The lfo emits its "out" parameter every block; the engine
        // forwards it to main_out and the dispatcher publishes it
        pump_block(&engine, 0);
        dispatcher.core.drain_rt_events();

        let events = recorder.take();
        assert!(events.iter().any(|event| matches!(
            event,
            NotificationEvent::ParameterChange { processor_name, parameter_name, .. }
                if processor_name == "wobble" && parameter_name == "out"
        )));
    }

    #[test]
    fn test_async_work_executes_and_completes() {
        let engine = Arc::new(AudioEngine::new(EngineConfig::default()));
        let dispatcher = EventDispatcher::new(Arc::clone(&engine));

        fn work(event_id: u64) -> i32 {
            event_id as i32 + 1
        }

        let status = dispatcher.core.handle_control_event(ControlEventKind::AsyncWork(
            AsyncWorkEvent { processor: ObjectId(9), event_id: 41, callback: work },
        ));
        assert_eq!(status, EventStatus::HandledOk);

        match engine.main_in_queue().pop() {
            Some(RtEvent::AsyncWorkCompletion { processor, event_id, status }) => {
                assert_eq!(processor, ObjectId(9));
                assert_eq!(event_id, 41);
                assert_eq!(status, 42);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_subscription_reported() {
        let engine = Arc::new(AudioEngine::new(EngineConfig::default()));
        let dispatcher = EventDispatcher::new(engine);
        let recorder = Recorder::new();

        assert_eq!(dispatcher.subscribe_to_keyboard_events(recorder.clone()), DispatcherStatus::Ok);
        assert_eq!(
            dispatcher.subscribe_to_keyboard_events(recorder.clone()),
            DispatcherStatus::AlreadySubscribed
        );
    }

    #[test]
    fn test_completion_callback_and_dispatcher_thread() {
        let engine = engine_with_synth();
        let dispatcher = EventDispatcher::new(Arc::clone(&engine));
        dispatcher.run();

        let completed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&completed);
        let event = ControlEvent::new(
            ControlEventKind::Keyboard(KeyboardEvent::note_on("synth", 0, 60, 1.0)),
            Time::ZERO,
        )
        .with_completion(Box::new(move |status| {
            assert_eq!(status, EventStatus::HandledOk);
            flag.store(true, Ordering::Release);
        }));
        dispatcher.post_event(event);

        let deadline = Instant::now() + Duration::from_secs(2);
        while !completed.load(Ordering::Acquire) {
            assert!(Instant::now() < deadline, "completion callback never ran");
            std::thread::sleep(Duration::from_millis(1));
        }
        dispatcher.stop();
    }
}
