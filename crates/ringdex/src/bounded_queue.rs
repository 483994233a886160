use crate::ring_buffer::{RingIndexBuffer, INVALID_INDEX, OVERFLOW_INDEX};
use crate::CapacityError;
use std::cell::UnsafeCell;
use std::error::Error;
use std::fmt;
use std::mem::MaybeUninit;

/// The queue was at capacity; the rejected value is handed back so the
/// caller can retry or drop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull<T>(pub T);

impl<T> QueueFull<T> {
    /// Recovers the value that did not fit.
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("bounded queue is full")
    }
}

impl<T: fmt::Debug> Error for QueueFull<T> {}

/// Bounded MPMC FIFO of `T` built from two index rings and a slot array.
///
/// Every slot index lives in exactly one place at a time: the `free` ring,
/// the `ready` ring, or in transit inside a single thread that is moving it
/// between the two. Holding an index is exclusive ownership of the slot, so
/// the slot writes and reads below need no further synchronization beyond
/// the Acquire/Release edges of the ring operations themselves.
///
/// Capacity is fixed at construction (rounded up to a power of two). A full
/// queue rejects the value rather than blocking or dropping it.
pub struct BoundedQueue<T> {
    /// Indices available for producers. Starts full.
    free: RingIndexBuffer,
    /// Indices carrying a live value. Starts empty.
    ready: RingIndexBuffer,
    /// One cell per index; valid exactly while its index is in `ready` or
    /// between a ready-dequeue and the free-return.
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Safety: slot access is serialized by exclusive index ownership; the rings
// provide the Acquire/Release ordering that transfers a slot between threads.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Creates a queue with at least `capacity` slots (rounded up to a
    /// power of two).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`capacity_max`](Self::capacity_max).
    pub fn new(capacity: usize) -> Self {
        let mut queue = Self {
            free: RingIndexBuffer::new(),
            ready: RingIndexBuffer::new(),
            slots: Box::new([]),
        };
        assert!(
            capacity <= Self::capacity_max(),
            "capacity {capacity} exceeds the supported maximum"
        );
        queue.resize(capacity);
        queue
    }

    /// The largest supported capacity.
    #[inline]
    pub const fn capacity_max() -> usize {
        1 << 62
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of queued values.
    #[inline]
    pub fn len(&self) -> usize {
        self.ready.len()
    }

    /// Returns `true` if no value is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reallocates to at least `capacity` slots and clears the queue.
    /// Not concurrency-safe.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), CapacityError> {
        if capacity > Self::capacity_max() {
            return Err(CapacityError {
                requested: capacity,
                max: Self::capacity_max(),
            });
        }
        self.resize(capacity);
        Ok(())
    }

    fn resize(&mut self, capacity: usize) {
        let cap_pow2 = capacity.max(1).next_power_of_two();
        if self.capacity() < cap_pow2 && cap_pow2 <= Self::capacity_max() {
            self.drain_slots();
            let mut slots = Vec::with_capacity(cap_pow2);
            slots.resize_with(cap_pow2, || UnsafeCell::new(MaybeUninit::uninit()));
            self.slots = slots.into_boxed_slice();
            self.ready.set_size(cap_pow2 << 1);
            self.free.set_size(cap_pow2 << 1);
        }
        self.clear();
    }

    /// Drops all queued values and resets the rings. Not concurrency-safe.
    pub fn clear(&mut self) {
        self.drain_slots();
        self.ready.clear();
        self.free.full();
    }

    /// Appends `value` at the tail.
    ///
    /// The `nonempty` flags on the two ring calls are load-bearing: the free
    /// dequeue reserves a slot and must report exhaustion as overflow, while
    /// the ready enqueue is an ordinary publication that refreshes the
    /// consumers' emptiness hint.
    pub fn enqueue(&self, value: T) -> Result<usize, QueueFull<T>> {
        let index = self.free.dequeue(true);
        if index == OVERFLOW_INDEX {
            return Err(QueueFull(value));
        }
        debug_assert_ne!(index, INVALID_INDEX);

        // SAFETY: `index` came from the free ring, so this thread is the
        // slot's only owner until the ready-enqueue below publishes it.
        unsafe {
            (*self.slots[index as usize].get()).write(value);
        }
        self.ready.enqueue(index, false);
        Ok(index as usize)
    }

    /// Removes and returns the head value, or `None` if the queue was
    /// observed empty. Never blocks.
    pub fn dequeue(&self) -> Option<T> {
        let index = self.ready.dequeue(false);
        if index == INVALID_INDEX {
            return None;
        }

        // SAFETY: the ready ring handed out `index`, so the slot holds an
        // initialized value and this thread is its only owner until the
        // free-enqueue below recycles it.
        let value = unsafe { (*self.slots[index as usize].get()).assume_init_read() };
        self.free.enqueue(index, true);
        Some(value)
    }

    /// Drops every initialized value. Callers reset the rings afterwards.
    fn drain_slots(&mut self) {
        while let Some(value) = self.dequeue() {
            drop(value);
        }
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        self.drain_slots();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_fifo_and_overflow() {
        let queue = BoundedQueue::<i32>::new(8);
        assert_eq!(queue.capacity(), 8);

        for v in [7, 6, 4, 8, 2, 1, 5, 3] {
            assert!(queue.enqueue(v).is_ok());
        }
        assert_eq!(queue.len(), 8);

        // At capacity: the value comes back.
        assert_eq!(queue.enqueue(9), Err(QueueFull(9)));

        for expected in [7, 6, 4, 8, 2, 1, 5, 3] {
            assert_eq!(queue.dequeue(), Some(expected));
        }
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_queue_capacity_rounds_up() {
        let queue = BoundedQueue::<u8>::new(5);
        assert_eq!(queue.capacity(), 8);
    }

    #[test]
    fn test_queue_movable_values() {
        let queue = BoundedQueue::<String>::new(4);
        queue.enqueue("first".to_string()).unwrap();
        queue.enqueue("second".to_string()).unwrap();
        assert_eq!(queue.dequeue().as_deref(), Some("first"));
        assert_eq!(queue.dequeue().as_deref(), Some("second"));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_queue_clear_drops_values() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

        #[derive(Debug)]
        struct DropTracker;
        impl Drop for DropTracker {
            fn drop(&mut self) {
                DROP_COUNT.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROP_COUNT.store(0, Ordering::SeqCst);
        let mut queue = BoundedQueue::<DropTracker>::new(4);
        queue.enqueue(DropTracker).unwrap();
        queue.enqueue(DropTracker).unwrap();
        queue.clear();
        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 2);
        assert!(queue.is_empty());

        // Queue stays usable after a clear.
        queue.enqueue(DropTracker).unwrap();
        drop(queue);
        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_queue_slot_reuse() {
        let queue = BoundedQueue::<u64>::new(2);
        for round in 0..100 {
            assert!(queue.enqueue(round).is_ok());
            assert_eq!(queue.dequeue(), Some(round));
        }
    }
}
