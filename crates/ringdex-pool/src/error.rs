//! Error types for pool operations.

use crate::task::SharedTask;
use std::fmt;
use thiserror::Error;

pub use ringdex::CapacityError;

/// The task queue was at capacity; carries the untaken task so the caller
/// can retry or drain the pool first.
///
/// `begin_offset` is the first iteration that was *not* scheduled;
/// iterations before it were accepted and will still run to completion.
#[derive(Error)]
#[error("task queue overflow at iteration {begin_offset} of {num_iterations}")]
pub struct OverflowError {
    task: SharedTask,
    begin_offset: i64,
    num_iterations: i64,
}

impl OverflowError {
    pub(crate) fn new(task: SharedTask, begin_offset: i64, num_iterations: i64) -> Self {
        Self {
            task,
            begin_offset,
            num_iterations,
        }
    }

    /// The task that did not fit.
    #[inline]
    pub fn task(&self) -> &SharedTask {
        &self.task
    }

    /// First iteration offset that was not scheduled.
    #[inline]
    pub fn begin_offset(&self) -> i64 {
        self.begin_offset
    }

    /// Total number of iterations the submission asked for.
    #[inline]
    pub fn num_iterations(&self) -> i64 {
        self.num_iterations
    }
}

impl fmt::Debug for OverflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverflowError")
            .field("task_id", &self.task.id())
            .field("begin_offset", &self.begin_offset)
            .field("num_iterations", &self.num_iterations)
            .finish()
    }
}
