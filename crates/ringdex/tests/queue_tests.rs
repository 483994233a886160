//! Integration tests for `RingIndexBuffer` and `BoundedQueue`.
//!
//! The multi-threaded scenarios run scaled-down versions of the full-scale
//! stress parameters; the properties they check are size-independent:
//! no value is lost, duplicated, or invented, and the capacity bound holds.

use ringdex::{BoundedQueue, QueueFull, RingIndexBuffer, INVALID_INDEX};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

#[test]
fn test_queue_single_producer_single_consumer_order() {
    let queue = BoundedQueue::<i32>::new(8);

    for v in [7, 6, 4, 8, 2, 1, 5, 3] {
        assert!(queue.enqueue(v).is_ok());
    }
    assert_eq!(queue.len(), 8);
    assert_eq!(queue.enqueue(9), Err(QueueFull(9)));

    for expected in [7, 6, 4, 8, 2, 1, 5, 3] {
        assert_eq!(queue.dequeue(), Some(expected));
    }
    assert_eq!(queue.dequeue(), None);
    assert_eq!(queue.len(), 0);
}

#[test]
fn test_queue_overflow_preserves_value() {
    let queue = BoundedQueue::<String>::new(2);
    queue.enqueue("a".to_string()).unwrap();
    queue.enqueue("b".to_string()).unwrap();

    let rejected = queue.enqueue("c".to_string()).unwrap_err();
    assert_eq!(rejected.into_inner(), "c");

    // Freeing one slot makes the enqueue succeed.
    assert_eq!(queue.dequeue().as_deref(), Some("a"));
    assert!(queue.enqueue("c".to_string()).is_ok());
}

#[test]
fn test_ring_concurrent_producers_cover_range() {
    const PRODUCERS: u64 = 8;
    const PER_PRODUCER: u64 = 1 << 10;
    const TOTAL: u64 = PRODUCERS * PER_PRODUCER;

    let ring = Arc::new(RingIndexBuffer::with_cells((TOTAL << 1) as usize));
    let barrier = Arc::new(Barrier::new(PRODUCERS as usize));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|t| {
            let ring = Arc::clone(&ring);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in (t * PER_PRODUCER)..((t + 1) * PER_PRODUCER) {
                    assert!(ring.enqueue(i, false));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(ring.len(), TOTAL as usize);

    // Concurrent consumers drain exactly the enqueued range, no value twice.
    let seen: Arc<Vec<AtomicUsize>> = Arc::new((0..TOTAL).map(|_| AtomicUsize::new(0)).collect());
    let barrier = Arc::new(Barrier::new(PRODUCERS as usize));
    let consumers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let ring = Arc::clone(&ring);
            let seen = Arc::clone(&seen);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..PER_PRODUCER {
                    let index = ring.dequeue(false);
                    assert_ne!(index, INVALID_INDEX);
                    seen[index as usize].fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for consumer in consumers {
        consumer.join().unwrap();
    }

    assert!(ring.is_empty());
    for (index, count) in seen.iter().enumerate() {
        assert_eq!(count.load(Ordering::Relaxed), 1, "index {index}");
    }
}

#[test]
fn test_queue_mpmc_multiset_preserved() {
    const PRODUCERS: u64 = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u64 = 10_000;

    let queue = Arc::new(BoundedQueue::<u64>::new(256));
    let consumed = Arc::new(Mutex::new(HashMap::<u64, usize>::new()));
    let done = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|t| {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in (t * PER_PRODUCER)..((t + 1) * PER_PRODUCER) {
                    let mut value = i;
                    // Spin on overflow: consumers are draining concurrently.
                    loop {
                        match queue.enqueue(value) {
                            Ok(_) => break,
                            Err(QueueFull(v)) => {
                                value = v;
                                thread::yield_now();
                            }
                        }
                    }
                }
                done.fetch_add(1, Ordering::Release);
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let consumed = Arc::clone(&consumed);
            let done = Arc::clone(&done);
            thread::spawn(move || loop {
                match queue.dequeue() {
                    Some(value) => {
                        *consumed.lock().unwrap().entry(value).or_insert(0) += 1;
                    }
                    None => {
                        if done.load(Ordering::Acquire) == PRODUCERS as usize
                            && queue.is_empty()
                        {
                            break;
                        }
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    for consumer in consumers {
        consumer.join().unwrap();
    }

    let consumed = consumed.lock().unwrap();
    assert_eq!(consumed.len(), (PRODUCERS * PER_PRODUCER) as usize);
    for t in 0..PRODUCERS {
        for i in (t * PER_PRODUCER)..((t + 1) * PER_PRODUCER) {
            assert_eq!(consumed.get(&i), Some(&1), "value {i}");
        }
    }
}

#[test]
fn test_queue_never_exceeds_capacity() {
    const CAPACITY: usize = 16;
    let queue = Arc::new(BoundedQueue::<usize>::new(CAPACITY));

    // Hammer the full queue from several producers; every extra enqueue
    // must overflow and the population must stay pinned at capacity.
    for i in 0..CAPACITY {
        queue.enqueue(i).unwrap();
    }
    let producers: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..1000 {
                    assert!(queue.enqueue(i).is_err());
                    assert!(queue.len() <= CAPACITY);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    assert_eq!(queue.len(), CAPACITY);
}
