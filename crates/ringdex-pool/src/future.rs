use crate::pool::{current_worker_index, PoolCore};
use crate::task::{FutureState, INVALID_TASK_ID};
use ringdex::Backoff;
use std::fmt;
use std::sync::Arc;

/// Handle to a task's result.
///
/// Waiting is cooperative and never takes a lock: a managed worker that
/// waits on a future runs other queued tasks in the meantime, so a task may
/// block on work it spawned itself without deadlocking the pool. Threads
/// the pool does not manage simply yield.
pub struct Future<R> {
    id: i64,
    state: Arc<FutureState<R>>,
    core: Arc<PoolCore>,
}

impl<R> Future<R> {
    pub(crate) fn new(id: i64, state: Arc<FutureState<R>>, core: Arc<PoolCore>) -> Self {
        Self { id, state, core }
    }

    /// The id of the task this future observes.
    #[inline]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Whether the future observes a real task. Futures returned by the
    /// pool are always valid; this mirrors the [`INVALID_TASK_ID`] sentinel.
    #[inline]
    pub fn valid(&self) -> bool {
        self.id != INVALID_TASK_ID
    }

    /// Returns `true` once the result has been published.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Blocks until the result is published, helping the pool when called
    /// from a managed worker.
    pub fn wait(&self) {
        let thread_id = current_worker_index();
        let managed = thread_id != crate::UNMANAGED_THREAD_ID;
        let mut backoff = Backoff::new();
        while !self.state.is_ready() {
            let ran = managed && self.core.run_one_task(thread_id);
            if ran {
                backoff.reset();
            } else {
                backoff.wait();
            }
        }
    }

    /// Waits for and returns the result.
    pub fn get(self) -> R {
        self.wait();
        self.state.take()
    }
}

impl<R> fmt::Debug for Future<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("id", &self.id)
            .field("ready", &self.is_ready())
            .finish()
    }
}
