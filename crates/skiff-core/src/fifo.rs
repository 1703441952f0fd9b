//! Lock-free event queue for audio-boundary communication
//!
//! Single-producer single-consumer bounded queue of [`RtEvent`]. Both
//! sides operate through `&self`, so one instance can be shared via `Arc`
//! between the two domains. Never allocates after construction, never
//! blocks: `push` fails when full, `pop` is wait-free.
//!
//! The producer/consumer roles are a runtime contract: at most one thread
//! may push and one may pop at any time. The engine enforces this through
//! its queue wiring (and a producer-side mutex where several client
//! threads share one queue).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::RtEvent;

/// Default capacity for engine event queues
pub const DEFAULT_FIFO_CAPACITY: usize = 512;

/// Bounded SPSC queue of realtime events
///
/// Cache-line aligned; capacity is rounded up to a power of two so index
/// wrapping is a mask.
#[repr(align(64))]
pub struct RtEventFifo {
    slots: Box<[UnsafeCell<Option<RtEvent>>]>,
    capacity: usize,
    mask: usize,
    /// Write position (only modified by the producer)
    write_pos: AtomicUsize,
    /// Read position (only modified by the consumer)
    read_pos: AtomicUsize,
}

// SAFETY: slot `i` is written only by the single producer before the
// release-store of `write_pos` past `i`, and taken only by the single
// consumer after the matching acquire-load, so no slot is ever accessed
// from two threads at once.
unsafe impl Sync for RtEventFifo {}
unsafe impl Send for RtEventFifo {}

impl RtEventFifo {
    /// Create a queue with at least `min_capacity` slots
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.next_power_of_two();
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            capacity,
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Push an event (producer side).
    ///
    /// Returns the event back to the caller when the queue is full.
    pub fn push(&self, event: RtEvent) -> Result<(), RtEvent> {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        if write.wrapping_sub(read) >= self.capacity {
            return Err(event);
        }

        let idx = write & self.mask;
        // SAFETY: we are the only producer and the slot at `idx` has been
        // consumed (read_pos is past it), see the Sync impl note.
        unsafe {
            *self.slots[idx].get() = Some(event);
        }

        self.write_pos.store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pop an event (consumer side)
    pub fn pop(&self) -> Option<RtEvent> {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);

        if write == read {
            return None;
        }

        let idx = read & self.mask;
        // SAFETY: the producer published this slot with the release-store
        // of `write_pos`, and we are the only consumer.
        let event = unsafe { (*self.slots[idx].get()).take() };

        self.read_pos.store(read.wrapping_add(1), Ordering::Release);
        event
    }

    /// Number of events currently queued
    #[inline]
    pub fn len(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RtEventFifo {
    fn default() -> Self {
        Self::new(DEFAULT_FIFO_CAPACITY)
    }
}
