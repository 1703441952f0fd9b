//! Real-time event records
//!
//! [`RtEvent`] is the single message type crossing the audio boundary in
//! either direction. Events are cheap to move and travel through
//! [`crate::RtEventFifo`] queues; heap payloads (strings, blobs, plugin
//! instances) ride along as boxes so that allocation and deallocation
//! always happen off the audio thread.

use crate::{ObjectId, ParameterId, PlayingMode, Processor, SyncMode, Time, TimeSignature};

/// Which direction a clip notification refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipChannel {
    Input,
    Output,
}

/// Callback for asynchronous work requested from the realtime domain.
///
/// A plain function pointer: processors create these without allocating.
pub type AsyncWorkCallback = fn(event_id: u64) -> i32;

/// Boxed processor travelling through the event plane.
///
/// Wraps the trait object so the event enum can derive `Debug`.
pub struct ProcessorBox(pub Box<dyn Processor>);

impl std::fmt::Debug for ProcessorBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProcessorBox({})", self.0.name())
    }
}

/// Event record passed between the non-realtime and realtime domains
#[derive(Debug)]
pub enum RtEvent {
    // ── Keyboard ────────────────────────────────────────────────────────
    NoteOn { processor: ObjectId, offset: usize, channel: u8, note: u8, velocity: f32 },
    NoteOff { processor: ObjectId, offset: usize, channel: u8, note: u8, velocity: f32 },
    NoteAftertouch { processor: ObjectId, offset: usize, channel: u8, note: u8, value: f32 },
    PitchBend { processor: ObjectId, offset: usize, channel: u8, value: f32 },

    // ── Parameter & property changes ────────────────────────────────────
    ParameterChange { processor: ObjectId, offset: usize, parameter: ParameterId, value: f32 },
    IntParameterChange { processor: ObjectId, offset: usize, parameter: ParameterId, value: i32 },
    BoolParameterChange { processor: ObjectId, offset: usize, parameter: ParameterId, value: bool },
    StringPropertyChange { processor: ObjectId, offset: usize, parameter: ParameterId, value: Box<str> },
    BlobPropertyChange { processor: ObjectId, offset: usize, parameter: ParameterId, value: Box<[u8]> },

    // ── Transport ───────────────────────────────────────────────────────
    Tempo { offset: usize, bpm: f32 },
    TimeSignature { offset: usize, signature: TimeSignature },
    PlayingMode { offset: usize, mode: PlayingMode },
    SyncMode { offset: usize, mode: SyncMode },

    // ── Topology (handled by the engine, acknowledged on control_out) ───
    InsertProcessor { correlation_id: u64, processor: ProcessorBox },
    RemoveProcessor { correlation_id: u64, processor: ObjectId },
    AddProcessorToTrack { correlation_id: u64, processor: ObjectId, track: ObjectId },
    RemoveProcessorFromTrack { correlation_id: u64, processor: ObjectId, track: ObjectId },
    AddTrack { correlation_id: u64, track: ObjectId },
    RemoveTrack { correlation_id: u64, track: ObjectId },
    StopEngine { correlation_id: u64 },

    /// Acknowledgement of a topology event, written by the audio thread.
    /// `returned` carries ownership back out of the realtime domain when a
    /// processor was removed, so it is dropped off-thread.
    TopologyAck { correlation_id: u64, handled: bool, returned: Option<ProcessorBox> },

    // ── Async work ──────────────────────────────────────────────────────
    AsyncWork { processor: ObjectId, event_id: u64, callback: AsyncWorkCallback },
    AsyncWorkCompletion { processor: ObjectId, event_id: u64, status: i32 },

    // ── Notifications ───────────────────────────────────────────────────
    ClipNotification { channel: usize, direction: ClipChannel },
    SynchronisationMarker { beats: f64, time: Time },
    CvOut { cv_id: usize, value: f32 },
    GateOut { gate_id: usize, high: bool },
}

impl RtEvent {
    /// Target processor, for events routed by id
    pub fn processor_id(&self) -> Option<ObjectId> {
        match self {
            RtEvent::NoteOn { processor, .. }
            | RtEvent::NoteOff { processor, .. }
            | RtEvent::NoteAftertouch { processor, .. }
            | RtEvent::PitchBend { processor, .. }
            | RtEvent::ParameterChange { processor, .. }
            | RtEvent::IntParameterChange { processor, .. }
            | RtEvent::BoolParameterChange { processor, .. }
            | RtEvent::StringPropertyChange { processor, .. }
            | RtEvent::BlobPropertyChange { processor, .. }
            | RtEvent::AsyncWork { processor, .. }
            | RtEvent::AsyncWorkCompletion { processor, .. } => Some(*processor),
            _ => None,
        }
    }

    /// Correlation id, for topology events and their acknowledgements
    pub fn correlation_id(&self) -> Option<u64> {
        match self {
            RtEvent::InsertProcessor { correlation_id, .. }
            | RtEvent::RemoveProcessor { correlation_id, .. }
            | RtEvent::AddProcessorToTrack { correlation_id, .. }
            | RtEvent::RemoveProcessorFromTrack { correlation_id, .. }
            | RtEvent::AddTrack { correlation_id, .. }
            | RtEvent::RemoveTrack { correlation_id, .. }
            | RtEvent::StopEngine { correlation_id }
            | RtEvent::TopologyAck { correlation_id, .. } => Some(*correlation_id),
            _ => None,
        }
    }

    /// True for keyboard (note and bend) events
    pub fn is_keyboard(&self) -> bool {
        matches!(
            self,
            RtEvent::NoteOn { .. }
                | RtEvent::NoteOff { .. }
                | RtEvent::NoteAftertouch { .. }
                | RtEvent::PitchBend { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_id_routing() {
        let event = RtEvent::NoteOn {
            processor: ObjectId(7),
            offset: 0,
            channel: 0,
            note: 60,
            velocity: 1.0,
        };
        assert_eq!(event.processor_id(), Some(ObjectId(7)));
        assert!(event.is_keyboard());
        assert_eq!(event.correlation_id(), None);

        let marker = RtEvent::SynchronisationMarker { beats: 0.0, time: Time::ZERO };
        assert_eq!(marker.processor_id(), None);
    }

    #[test]
    fn test_correlation_id() {
        let event = RtEvent::RemoveTrack { correlation_id: 42, track: ObjectId(1) };
        assert_eq!(event.correlation_id(), Some(42));

        let ack = RtEvent::TopologyAck { correlation_id: 42, handled: true, returned: None };
        assert_eq!(ack.correlation_id(), Some(42));
    }
}
