//! ringdex-pool - Task-Parallel Worker Pool
//!
//! A fixed-size thread pool layered on the [`ringdex`] structures: the task
//! queue is a [`ringdex::BoundedQueue`], the set of live task ids is a
//! [`ringdex::SearchTree`], and idle workers sleep on a
//! [`ringdex::AtomicWord`].
//!
//! # Features
//!
//! - Scalar tasks with typed result futures
//! - Data-parallel loops (one queued slot per iteration)
//! - Parent/child ordering: a task can be held until a specific task — or
//!   every earlier task — has completed
//! - Cooperative futures: a worker waiting on a future runs other queued
//!   tasks instead of blocking the pool
//! - Recoverable queue overflow carrying the unscheduled task back to the
//!   caller
//!
//! # Example
//!
//! ```
//! use ringdex_pool::{WorkerPool, NO_TASK};
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use std::sync::Arc;
//!
//! let pool = WorkerPool::new(4);
//!
//! let sum = Arc::new(AtomicI64::new(0));
//! let future = {
//!     let sum = Arc::clone(&sum);
//!     pool.enqueue_loop(
//!         move |i, _thread_id| {
//!             sum.fetch_add(i, Ordering::Relaxed);
//!         },
//!         0,
//!         10,
//!         NO_TASK,
//!     )
//!     .unwrap()
//! };
//! future.get();
//! assert_eq!(sum.load(Ordering::Relaxed), 45);
//! ```

mod error;
mod future;
mod pool;
mod task;

pub use error::{CapacityError, OverflowError};
pub use future::Future;
pub use pool::WorkerPool;
pub use task::{PoolTask, SharedTask, ALL_PRECEDENCES, INVALID_TASK_ID, NO_TASK};

/// Logical index reported for threads the pool does not manage.
pub const UNMANAGED_THREAD_ID: i64 = i64::MIN;
