//! Loom model tests.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! Loom explores thread interleavings exhaustively, which caps the model
//! size it can handle. These tests therefore check the *protocols* the
//! structures rely on in reduced form: the exclusive-slot handoff behind
//! `BoundedQueue` and the publish/wake pattern behind `AtomicWord`.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use loom::sync::Arc;
use loom::thread;
use std::cell::UnsafeCell;

/// Two-slot index handoff: a slot index moves free -> ready -> free, and
/// holding the index is exclusive ownership of the slot cell.
struct SlotHandoff {
    /// Index published to the consumer, or u64::MAX when none.
    ready: AtomicU64,
    slots: UnsafeCell<[u64; 2]>,
}

unsafe impl Send for SlotHandoff {}
unsafe impl Sync for SlotHandoff {}

impl SlotHandoff {
    fn new() -> Self {
        Self {
            ready: AtomicU64::new(u64::MAX),
            slots: UnsafeCell::new([0; 2]),
        }
    }

    fn publish(&self, index: usize, value: u64) -> bool {
        // SAFETY (model): the producer owns `index` until the Release store
        // below hands it over.
        unsafe {
            (*self.slots.get())[index] = value;
        }
        self.ready
            .compare_exchange(
                u64::MAX,
                index as u64,
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    fn consume(&self) -> Option<u64> {
        let index = self.ready.swap(u64::MAX, Ordering::Acquire);
        if index == u64::MAX {
            return None;
        }
        // SAFETY (model): the Acquire swap took ownership of `index`; the
        // producer's Release store ordered the slot write before it.
        Some(unsafe { (*self.slots.get())[index as usize] })
    }
}

#[test]
fn loom_slot_handoff_reads_published_value() {
    loom::model(|| {
        let handoff = Arc::new(SlotHandoff::new());

        let producer = {
            let handoff = Arc::clone(&handoff);
            thread::spawn(move || handoff.publish(0, 42))
        };

        let consumed = handoff.consume();
        let published = producer.join().unwrap();

        // Whatever the interleaving, a consumed value is the published one.
        if let Some(value) = consumed {
            assert!(published);
            assert_eq!(value, 42);
        }
    });
}

#[test]
fn loom_pending_count_never_loses_a_publication() {
    loom::model(|| {
        let pending = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..2)
            .map(|_| {
                let pending = Arc::clone(&pending);
                thread::spawn(move || {
                    pending.fetch_add(1, Ordering::Release);
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        // Both publications are visible after the joins.
        assert_eq!(pending.load(Ordering::Acquire), 2);
    });
}
