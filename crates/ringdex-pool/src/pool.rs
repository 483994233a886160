use crate::error::{CapacityError, OverflowError};
use crate::future::Future;
use crate::task::{
    FutureState, LoopTask, ScalarTask, SharedTask, TaskHeader, WorkerSlot, ALL_PRECEDENCES,
    NO_TASK,
};
use crate::UNMANAGED_THREAD_ID;
use crossbeam_utils::CachePadded;
use ringdex::{AtomicWord, Backoff, BoundedQueue, SearchTree};
use std::cell::{Cell, UnsafeCell};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

thread_local! {
    /// Logical index of the current thread within its pool, set once by
    /// each spawned worker. Threads the pool does not manage keep the
    /// sentinel and never participate in cooperative task-stealing.
    static WORKER_INDEX: Cell<i64> = const { Cell::new(UNMANAGED_THREAD_ID) };
}

/// Logical worker index of the calling thread, or
/// [`UNMANAGED_THREAD_ID`](crate::UNMANAGED_THREAD_ID).
pub(crate) fn current_worker_index() -> i64 {
    WORKER_INDEX.get()
}

/// State shared between the pool handle, its workers, and live futures.
pub(crate) struct PoolCore {
    /// Monotonic task-id source.
    next_task_id: CachePadded<AtomicI64>,
    /// Workers not parked in the idle wait.
    active_workers: CachePadded<AtomicI32>,
    /// Queued-slot count and the workers' blocking signal. −1 gates
    /// construction and orders shutdown.
    pending_slots: AtomicWord,
    /// Task queue. The cell is only taken mutably while every worker is
    /// joined (capacity changes, clears, destruction).
    queue: UnsafeCell<BoundedQueue<WorkerSlot>>,
    /// Live task ids; doubles as the parent/child ordering domain.
    tree: UnsafeCell<SearchTree>,
}

// Safety: the queue and tree are Sync themselves; the UnsafeCells exist
// solely so the owning pool can reconfigure them while no worker thread is
// alive. Shared access always goes through &-returning accessors.
unsafe impl Send for PoolCore {}
unsafe impl Sync for PoolCore {}

impl PoolCore {
    #[inline]
    pub(crate) fn queue(&self) -> &BoundedQueue<WorkerSlot> {
        // SAFETY: see the Sync rationale above.
        unsafe { &*self.queue.get() }
    }

    #[inline]
    pub(crate) fn tree(&self) -> &SearchTree {
        // SAFETY: see the Sync rationale above.
        unsafe { &*self.tree.get() }
    }

    fn issue_task_id(&self) -> i64 {
        self.next_task_id.fetch_add(1, Ordering::AcqRel)
    }

    fn workers_enabled(&self) -> bool {
        self.pending_slots.load(Ordering::Acquire) >= 0
    }

    /// Dequeues one slot, keeping the pending count in step.
    fn fetch_task(&self) -> Option<WorkerSlot> {
        let slot = self.queue().dequeue();
        if slot.is_some() {
            self.pending_slots.fetch_sub(1, Ordering::Release);
        }
        slot
    }

    /// Fetches and runs one queued task. Used by waiting futures.
    pub(crate) fn run_one_task(&self, thread_id: i64) -> bool {
        debug_assert_ne!(
            thread_id, UNMANAGED_THREAD_ID,
            "unmanaged thread tried to run pool work"
        );
        match self.fetch_task() {
            Some(slot) => {
                slot.run(thread_id);
                true
            }
            None => false,
        }
    }

    /// Blocks (cooperatively) until the parent relation is satisfied.
    pub(crate) fn wait_for_parent(&self, task_id: i64, parent_id: i64) {
        let mut backoff = Backoff::new();
        loop {
            let satisfied = if parent_id == NO_TASK {
                true
            } else if parent_id == ALL_PRECEDENCES {
                // Oldest live task runs first.
                self.tree().find_min() == Some(task_id as f64)
            } else {
                !self.tree().contains(parent_id)
            };
            if satisfied {
                break;
            }
            backoff.wait();
        }
    }

    /// Publishes `iterations` slots for `task`, waking workers as they
    /// become available. On overflow the pending count is rolled back for
    /// the unscheduled remainder and the task is handed back; iterations
    /// scheduled before the failure still run.
    fn submit(&self, task: &SharedTask, iterations: i64) -> Result<(), OverflowError> {
        self.pending_slots.fetch_add(iterations as i32, Ordering::Release);
        for offset in 0..iterations {
            let slot = WorkerSlot::new(Arc::clone(task), offset);
            match self.queue().enqueue(slot) {
                Ok(_) => self.pending_slots.notify_one(),
                Err(full) => {
                    let rest = (iterations - offset) as i32;
                    self.pending_slots.fetch_sub(rest, Ordering::Release);
                    self.pending_slots.notify_all();
                    return Err(OverflowError::new(
                        full.into_inner().into_task(),
                        offset,
                        iterations,
                    ));
                }
            }
        }
        if iterations > 1 {
            self.pending_slots.notify_all();
        }
        Ok(())
    }

    fn worker_loop(&self, thread_id: i64) {
        while self.workers_enabled() {
            match self.fetch_task() {
                Some(slot) => slot.run(thread_id),
                None => {
                    let pending = self.pending_slots.load(Ordering::Acquire);
                    if pending > 0 {
                        // A producer just published; the dequeue lost the
                        // race, so spin once instead of sleeping.
                        thread::yield_now();
                    } else {
                        self.active_workers.fetch_sub(1, Ordering::Release);
                        self.pending_slots.wait(0, Ordering::Acquire);
                        self.active_workers.fetch_add(1, Ordering::Release);
                    }
                }
            }
        }
    }
}

/// Fixed-size worker pool with task futures, data-parallel loops, and
/// parent/child ordering.
///
/// Submission wraps the closure into a reference-counted task, registers
/// its id in the live-id tree, and queues one slot per iteration; workers
/// sleep on a futex-backed word when idle. The worker count is fixed at
/// construction.
///
/// # Example
///
/// ```
/// use ringdex_pool::{WorkerPool, NO_TASK};
///
/// let pool = WorkerPool::new(2);
/// let future = pool.enqueue(|_thread_id| 6 * 7, NO_TASK).unwrap();
/// assert_eq!(future.get(), 42);
/// pool.wait_for_completion();
/// ```
pub struct WorkerPool {
    core: Arc<PoolCore>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates a pool with `num_threads` workers (0 means one per logical
    /// core) and the default queue capacity.
    pub fn new(num_threads: usize) -> Self {
        Self::with_capacity(num_threads, Self::default_capacity())
    }

    /// Creates a pool with an explicit task-queue capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`capacity_max`](Self::capacity_max).
    pub fn with_capacity(num_threads: usize, capacity: usize) -> Self {
        assert!(
            capacity <= Self::capacity_max(),
            "capacity {capacity} exceeds the supported maximum"
        );
        let core = Arc::new(PoolCore {
            next_task_id: CachePadded::new(AtomicI64::new(0)),
            active_workers: CachePadded::new(AtomicI32::new(0)),
            pending_slots: AtomicWord::new(-1),
            queue: UnsafeCell::new(BoundedQueue::new(capacity)),
            // Live ids outnumber queued slots while tasks are in flight
            // (queued + running + mid-submission), so the tree gets slack.
            tree: UnsafeCell::new(SearchTree::with_capacity(capacity * 2)),
        });
        let mut pool = Self {
            core,
            workers: Vec::new(),
        };
        pool.spawn_workers(num_threads);
        pool
    }

    /// Default task-queue capacity.
    #[inline]
    pub const fn default_capacity() -> usize {
        1024
    }

    /// The largest supported queue capacity.
    #[inline]
    pub const fn capacity_max() -> usize {
        SearchTree::capacity_max() >> 1
    }

    /// Number of worker threads.
    #[inline]
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Task-queue capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.core.queue().capacity()
    }

    /// Number of queued, not-yet-fetched slots.
    #[inline]
    pub fn size(&self) -> usize {
        self.core.queue().len()
    }

    /// Returns `true` if no slot is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.core.queue().is_empty()
    }

    /// Submits a task. The closure receives the logical index of the worker
    /// that runs it. `parent_id` orders this task after another
    /// ([`NO_TASK`] for none, [`ALL_PRECEDENCES`] for every earlier task).
    pub fn enqueue<F, R>(&self, func: F, parent_id: i64) -> Result<Future<R>, OverflowError>
    where
        F: FnOnce(i64) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task_id, parent_id) = self.register_task(parent_id);
        let state = Arc::new(FutureState::new());
        let task: SharedTask = Arc::new(ScalarTask::new(
            TaskHeader::new(task_id, parent_id, Arc::clone(&self.core)),
            func,
            Arc::clone(&state),
        ));
        self.core.submit(&task, 1)?;
        Ok(Future::new(task_id, state, Arc::clone(&self.core)))
    }

    /// Submits a data-parallel loop over `begin..end`. The closure receives
    /// `(iteration, worker_index)`; iterations run concurrently across the
    /// pool and the future completes when the last one finishes.
    pub fn enqueue_loop<F>(
        &self,
        func: F,
        begin: i64,
        end: i64,
        parent_id: i64,
    ) -> Result<Future<()>, OverflowError>
    where
        F: Fn(i64, i64) + Send + Sync + 'static,
    {
        let iterations = end - begin;
        debug_assert!(iterations > 0, "loop range {begin}..{end} is empty");
        let (task_id, parent_id) = self.register_task(parent_id);
        let state = Arc::new(FutureState::new());
        let task: SharedTask = Arc::new(LoopTask::new(
            TaskHeader::new(task_id, parent_id, Arc::clone(&self.core)),
            func,
            begin,
            Arc::clone(&state),
        ));
        self.core.submit(&task, iterations)?;
        Ok(Future::new(task_id, state, Arc::clone(&self.core)))
    }

    /// Blocks until every queued slot has been fetched and every worker has
    /// gone idle.
    pub fn wait_for_completion(&self) {
        let mut backoff = Backoff::new();
        while !self.core.queue().is_empty()
            || self.core.active_workers.load(Ordering::Acquire) != 0
        {
            backoff.wait();
        }
    }

    /// Drops queued tasks, resets the id counter, and restarts the workers.
    pub fn clear(&mut self) {
        let num_threads = self.workers.len();
        self.wait_for_completion();
        self.join_workers();
        self.core.next_task_id.store(0, Ordering::Release);
        // SAFETY: every worker is joined; no other thread touches the cells.
        unsafe {
            (*self.core.queue.get()).clear();
            (*self.core.tree.get()).clear();
        }
        self.spawn_workers(num_threads);
    }

    /// Changes the task-queue capacity. Queued tasks are cleared and the
    /// workers restarted.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), CapacityError> {
        if capacity > Self::capacity_max() {
            return Err(CapacityError {
                requested: capacity,
                max: Self::capacity_max(),
            });
        }
        let num_threads = self.workers.len();
        self.wait_for_completion();
        self.join_workers();
        self.core.next_task_id.store(0, Ordering::Release);
        // SAFETY: every worker is joined; no other thread touches the cells.
        unsafe {
            (*self.core.queue.get()).set_capacity(capacity)?;
            (*self.core.tree.get()).set_capacity(capacity * 2)?;
        }
        self.spawn_workers(num_threads);
        Ok(())
    }

    fn spawn_workers(&mut self, num_threads: usize) {
        let n = if num_threads == 0 {
            thread::available_parallelism().map_or(1, NonZeroUsize::get)
        } else {
            num_threads
        };

        // Gate the workers on −1 until every thread exists, so no task can
        // slip in before the pool is whole.
        self.core.pending_slots.store(-1, Ordering::Release);
        self.core
            .active_workers
            .store(n as i32, Ordering::Release);
        self.workers.reserve(n);
        for index in 0..n {
            let core = Arc::clone(&self.core);
            self.workers.push(thread::spawn(move || {
                WORKER_INDEX.set(index as i64);
                core.pending_slots.wait(-1, Ordering::Acquire);
                core.worker_loop(index as i64);
            }));
        }

        self.core.pending_slots.store(0, Ordering::Release);
        self.core.pending_slots.notify_all();

        // Let the workers settle into the idle state.
        self.wait_for_completion();
    }

    fn join_workers(&mut self) {
        self.core.pending_slots.store(-1, Ordering::Release);
        self.core.pending_slots.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.core.active_workers.store(0, Ordering::Release);
    }

    /// Issues a task id and registers it as live. Task 0 has no parent by
    /// definition: nothing was ever submitted before it.
    fn register_task(&self, parent_id: i64) -> (i64, i64) {
        let task_id = self.core.issue_task_id();
        let (added, _handle) = self.core.tree().add(task_id);
        debug_assert!(added, "task id {task_id} already live");
        let parent_id = if task_id == 0 { NO_TASK } else { parent_id };
        (task_id, parent_id)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join_workers();
        // SAFETY: workers joined; dropping queued slots retires their ids
        // from the tree before the tree itself is cleared.
        unsafe {
            (*self.core.queue.get()).clear();
            (*self.core.tree.get()).clear();
        }
    }
}
