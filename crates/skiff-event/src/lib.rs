//! skiff-event: Asynchronous control events and the event dispatcher
//!
//! The dispatcher is the bridge between high-level control events
//! (posted by OSC/gRPC/MIDI frontends) and the engine's realtime event
//! plane, in both directions: control events become realtime events
//! pushed to the engine, and realtime notifications coming back are
//! translated and published to subscribed listeners.

mod dispatcher;
mod event;

pub use dispatcher::{DISPATCHER_POLL_PERIOD, DispatcherStatus, EventDispatcher};
pub use event::*;
