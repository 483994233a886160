//! Worker-pool demo: scalar tasks, a data-parallel loop, and parent
//! ordering.
//!
//! Run with: `cargo run --bin demo`

use ringdex_pool::{WorkerPool, ALL_PRECEDENCES, NO_TASK};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    println!("## WorkerPool demo");
    let pool = WorkerPool::new(4);

    // Task parallel
    println!("Task parallel:");
    let task = |thread_id: i64| {
        std::thread::sleep(Duration::from_millis(100 + thread_id as u64 * 50));
        println!("  task processed by worker {thread_id}");
    };
    let first = pool.enqueue(task, NO_TASK).unwrap();
    let second = pool.enqueue(task, NO_TASK).unwrap();
    first.get();
    second.get();

    // Loop parallel
    println!("Loop parallel:");
    let sum = Arc::new(AtomicI64::new(0));
    let loop_future = {
        let sum = Arc::clone(&sum);
        pool.enqueue_loop(
            move |i, thread_id| {
                sum.fetch_add(i, Ordering::Relaxed);
                println!("  iteration {i} ran on worker {thread_id}");
            },
            0,
            8,
            NO_TASK,
        )
        .unwrap()
    };
    loop_future.get();
    println!("  sum of 0..8 = {}", sum.load(Ordering::Relaxed));

    // Parent ordering: the report task waits for everything above.
    let report = pool
        .enqueue(|_| println!("All earlier tasks are done."), ALL_PRECEDENCES)
        .unwrap();
    report.get();

    pool.wait_for_completion();
}
