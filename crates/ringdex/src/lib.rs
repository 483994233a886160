//! ringdex - Lock-Free Bounded Concurrent Data Structures
//!
//! Three tightly coupled MPMC building blocks:
//!
//! - [`RingIndexBuffer`]: a bounded lock-free allocator/queue of `u64`
//!   indices (the scalable-circular-queue scheme: 2N cells, embedded cycle
//!   counters, cache-line permutation).
//! - [`BoundedQueue`]: a generic MPMC FIFO built from a free ring, a ready
//!   ring, and a slot array.
//! - [`SearchTree`]: a help-optimal lock-free BST over `f64`-convertible
//!   keys with stable per-key handles, node arenas fed by ring-index pools.
//!
//! Plus the coordination primitives the thread-manager layer builds on:
//! [`AtomicWord`] (futex-backed blocking wait/notify) and [`Backoff`].
//!
//! # Example
//!
//! ```
//! use ringdex::{BoundedQueue, SearchTree};
//!
//! let queue = BoundedQueue::<u64>::new(8);
//! queue.enqueue(42).unwrap();
//! assert_eq!(queue.dequeue(), Some(42));
//!
//! let tree = SearchTree::new();
//! let (inserted, handle) = tree.add(3.5);
//! assert!(inserted && tree.contains(3.5));
//! let (_, same_handle) = tree.add(3.5);
//! assert_eq!(handle, same_handle);
//! ```

mod atomic_word;
mod backoff;
mod bounded_queue;
mod invariants;
mod node;
mod ring_buffer;
mod search_tree;

pub use atomic_word::AtomicWord;
pub use backoff::Backoff;
pub use bounded_queue::{BoundedQueue, QueueFull};
pub use node::{
    TreeNode, INVALID_ID, MAX0_KEY, MAX1_KEY, MAX2_KEY, MIN0_KEY, MIN1_KEY,
};
pub use ring_buffer::{RingIndexBuffer, CACHE_LINE_SIZE, INVALID_INDEX, OVERFLOW_INDEX};
pub use search_tree::{SearchTree, TreeKey};

use thiserror::Error;

/// The requested capacity exceeds what the structure supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("capacity {requested} exceeds the supported maximum {max}")]
pub struct CapacityError {
    /// The capacity the caller asked for.
    pub requested: usize,
    /// The structure's maximum capacity.
    pub max: usize,
}
