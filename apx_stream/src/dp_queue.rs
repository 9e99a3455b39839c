//! Cross-domain deferred-processing queue.
//!
//! A DP queue carries audio between the low-latency tick and a deferred
//! task that runs at its own cadence, possibly on another core. It offers
//! the same source/sink contract as a plain buffer but decouples the two
//! sides with a pair of swap-able slots: the producer fills one while the
//! consumer drains the other, and ownership is exchanged through a single
//! Acquire/Release flag. The consumer can therefore never observe a torn
//! slot: every byte it reads was published by the handoff that preceded
//! its acquire.

use core::cell::UnsafeCell;

#[cfg(not(loom))]
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

#[cfg(loom)]
use loom::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use apx_core::{CacheAttr, CacheHandle, MemZone, SampleFormat, coherent};

use crate::buffer::{AudioBuffer, BufferId};

/// Fill state of the queue as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpQueueState {
    /// Nothing buffered on the producer side, nothing handed off.
    Empty,
    /// The producer slot holds data below the handoff threshold.
    Partial,
    /// A slot is handed off and awaiting the consumer.
    Full,
}

/// Backing-memory mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpQueueMode {
    /// Producer and consumer share a core; no cache maintenance needed.
    Local,
    /// Cross-core backing memory; slots are written back before handoff
    /// and invalidated after acquire.
    Shared,
}

struct DpQueueInner {
    slots: [UnsafeCell<AudioBuffer>; 2],
    /// Slot index currently offered to the consumer. Meaningful only
    /// while `ready` is set.
    front: AtomicUsize,
    /// Handoff flag: set by the producer with Release after the slot is
    /// complete, cleared by the consumer with Release once drained.
    ready: AtomicBool,
    mode: DpQueueMode,
}

// SAFETY: slot access is partitioned by the protocol. The producer only
// touches its own slot; the consumer only touches `front` after observing
// `ready` with Acquire; the two indices are never equal while `ready` is
// set.
unsafe impl Send for DpQueueInner {}
unsafe impl Sync for DpQueueInner {}

/// Factory for producer/consumer halves.
pub struct DpQueue;

impl DpQueue {
    /// Creates a queue with two `slot_bytes`-sized slots.
    ///
    /// Slot capacity follows the usual frame-size round-up. `format`, when
    /// given, is applied to both slots so frame-based modules can run
    /// against them directly.
    pub fn new(
        id: BufferId,
        slot_bytes: usize,
        mode: DpQueueMode,
        format: Option<SampleFormat>,
    ) -> (DpProducer, DpConsumer) {
        Self::with_cache(id, slot_bytes, mode, format, coherent())
    }

    /// As [`DpQueue::new`] with explicit platform cache hooks for shared
    /// mode.
    pub fn with_cache(
        id: BufferId,
        slot_bytes: usize,
        mode: DpQueueMode,
        format: Option<SampleFormat>,
        cache: CacheHandle,
    ) -> (DpProducer, DpConsumer) {
        let zone = match mode {
            DpQueueMode::Local => MemZone::Runtime,
            DpQueueMode::Shared => MemZone::RuntimeShared,
        };
        let mut make_slot = |n: u32| {
            // Maintenance happens at swap granularity, so the slots
            // themselves are allocated coherent.
            let mut slot = AudioBuffer::alloc(BufferId(id.0 + n), slot_bytes, zone, CacheAttr::Coherent, cache.clone());
            if let Some(fmt) = format {
                let _ = slot.set_format(fmt);
            }
            slot
        };

        let inner = Arc::new(DpQueueInner {
            slots: [UnsafeCell::new(make_slot(0)), UnsafeCell::new(make_slot(1))],
            front: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
            mode,
        });

        (
            DpProducer {
                inner: Arc::clone(&inner),
                slot: 0,
            },
            DpConsumer { inner, acquired: false },
        )
    }
}

/// Producer half: filled by the LL shuttle (or by a DP module's output).
pub struct DpProducer {
    inner: Arc<DpQueueInner>,
    slot: usize,
}

// SAFETY: the producer half only ever dereferences its own slot.
unsafe impl Send for DpProducer {}

impl DpProducer {
    /// The sink endpoint: the slot this side is currently filling.
    #[inline]
    pub fn sink(&mut self) -> &mut AudioBuffer {
        // SAFETY: `self.slot` is owned by the producer side; the consumer
        // never touches it while `ready` handoff discipline is upheld.
        unsafe { &mut *self.inner.slots[self.slot].get() }
    }

    /// Attempts the handoff: publishes the current slot to the consumer
    /// when it holds at least `threshold` bytes and the consumer side is
    /// free, then adopts the drained slot.
    ///
    /// Returns `true` when a swap happened.
    pub fn commit(&mut self, threshold: usize) -> bool {
        if self.inner.ready.load(Ordering::Acquire) {
            // Consumer still owns the other slot.
            return false;
        }
        let filled = self.sink().available();
        if filled < threshold.max(1) {
            return false;
        }
        if self.inner.mode == DpQueueMode::Shared {
            self.sink().writeback_all();
        }
        self.inner.front.store(self.slot, Ordering::Relaxed);
        self.inner.ready.store(true, Ordering::Release);
        self.slot = 1 - self.slot;
        true
    }

    /// Queue fill state as seen from the producer side.
    pub fn state(&mut self) -> DpQueueState {
        if self.inner.ready.load(Ordering::Acquire) {
            DpQueueState::Full
        } else if self.sink().available() == 0 {
            DpQueueState::Empty
        } else {
            DpQueueState::Partial
        }
    }
}

/// Consumer half: drained by the DP task (or by the LL shuttle on the
/// return direction).
pub struct DpConsumer {
    inner: Arc<DpQueueInner>,
    acquired: bool,
}

// SAFETY: the consumer half only dereferences `front` after an Acquire
// load of `ready` observes the producer's Release store.
unsafe impl Send for DpConsumer {}

impl DpConsumer {
    /// The source endpoint: the handed-off slot, if any.
    ///
    /// Repeated calls return the same slot until [`release`](Self::release);
    /// a partially drained slot stays acquired across calls.
    pub fn source(&mut self) -> Option<&mut AudioBuffer> {
        if !self.acquired {
            if !self.inner.ready.load(Ordering::Acquire) {
                return None;
            }
            self.acquired = true;
            if self.inner.mode == DpQueueMode::Shared {
                // SAFETY: ready was observed; the front slot is ours.
                let slot = unsafe { &*self.inner.slots[self.inner.front.load(Ordering::Relaxed)].get() };
                slot.invalidate_all();
            }
        }
        let idx = self.inner.front.load(Ordering::Relaxed);
        // SAFETY: acquired implies the handoff was observed and not yet
        // released; the producer is confined to the other slot.
        Some(unsafe { &mut *self.inner.slots[idx].get() })
    }

    /// Returns the drained slot to the producer side.
    ///
    /// Any bytes left unread are dropped; callers release only after
    /// draining.
    pub fn release(&mut self) {
        if !self.acquired {
            return;
        }
        let idx = self.inner.front.load(Ordering::Relaxed);
        // SAFETY: still the owner until the Release store below.
        unsafe { (*self.inner.slots[idx].get()).reset() };
        self.acquired = false;
        self.inner.ready.store(false, Ordering::Release);
    }

    /// `true` when a handed-off slot is waiting or held.
    pub fn has_data(&self) -> bool {
        self.acquired || self.inner.ready.load(Ordering::Acquire)
    }
}


#[cfg(loom)]
mod loom_tests {
    use loom::thread;

    use super::*;
    use crate::stream::{read_into, write_from};

    #[test]
    fn loom_consumer_never_sees_torn_slot() {
        loom::model(|| {
            let (mut tx, mut rx) = DpQueue::new(BufferId(1), 32, DpQueueMode::Local, None);

            let producer = thread::spawn(move || {
                write_from(tx.sink(), &[0x11; 8]);
                tx.commit(8);
            });

            let consumer = thread::spawn(move || {
                if let Some(slot) = rx.source() {
                    // Everything visible must be the complete handoff.
                    let mut out = [0u8; 8];
                    let n = read_into(slot, &mut out);
                    assert_eq!(n, 8);
                    assert_eq!(out, [0x11; 8]);
                    rx.release();
                }
            });

            producer.join().unwrap();
            consumer.join().unwrap();
        });
    }
}
