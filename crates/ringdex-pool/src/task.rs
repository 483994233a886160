//! Task objects queued and run by the pool.
//!
//! A submission becomes one reference-counted task plus one queued
//! [`WorkerSlot`] per iteration. The reference count doubles as the
//! completion detector: when the last slot (or the overflow error holding
//! the task) drops its reference, the task drops, publishes any pending
//! loop result, and removes its id from the live-id tree — which is the
//! release edge children synchronize on.

use crate::pool::PoolCore;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Parent id of a task with no ordering constraint.
pub const NO_TASK: i64 = i64::MAX;

/// Parent id meaning "all previously submitted tasks".
pub const ALL_PRECEDENCES: i64 = -1;

/// Id of no task.
pub const INVALID_TASK_ID: i64 = i64::MIN;

/// A runnable unit owned by the pool.
pub trait PoolTask: Send + Sync {
    /// The task's id.
    fn id(&self) -> i64;

    /// The id this task is ordered after, or a sentinel.
    fn parent_id(&self) -> i64;

    /// Runs one iteration. `thread_id` is the logical index of the calling
    /// worker; `offset` selects the iteration of a loop task and is 0 for
    /// scalar tasks.
    fn run(&self, thread_id: i64, offset: i64);
}

/// Shared handle to a queued task.
pub type SharedTask = Arc<dyn PoolTask>;

/// One queue entry: a task reference plus the iteration it stands for.
pub(crate) struct WorkerSlot {
    task: SharedTask,
    offset: i64,
}

impl WorkerSlot {
    pub(crate) fn new(task: SharedTask, offset: i64) -> Self {
        Self { task, offset }
    }

    pub(crate) fn into_task(self) -> SharedTask {
        self.task
    }

    pub(crate) fn run(self, thread_id: i64) {
        self.task.run(thread_id, self.offset);
    }
}

/// Identity and lifecycle shared by every task shape. Dropping the header
/// (i.e. the last task reference) retires the task id from the live-id
/// tree, releasing any child waiting on it.
pub(crate) struct TaskHeader {
    id: i64,
    parent_id: i64,
    core: Arc<PoolCore>,
}

impl TaskHeader {
    pub(crate) fn new(id: i64, parent_id: i64, core: Arc<PoolCore>) -> Self {
        Self {
            id,
            parent_id,
            core,
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> i64 {
        self.id
    }

    #[inline]
    pub(crate) fn parent_id(&self) -> i64 {
        self.parent_id
    }

    pub(crate) fn wait_for_parent(&self) {
        self.core.wait_for_parent(self.id, self.parent_id);
    }
}

impl Drop for TaskHeader {
    fn drop(&mut self) {
        let removed = self.core.tree().remove(self.id);
        debug_assert!(removed, "task id {} was not in the live-id tree", self.id);
    }
}

/// Result cell shared between a task and its [`Future`](crate::Future).
pub(crate) struct FutureState<R> {
    ready: AtomicBool,
    taken: AtomicBool,
    value: UnsafeCell<MaybeUninit<R>>,
}

// Safety: the value cell has a single writer (the worker that completes the
// task) and a single reader (the future), ordered by the Release store /
// Acquire load on `ready`.
unsafe impl<R: Send> Send for FutureState<R> {}
unsafe impl<R: Send> Sync for FutureState<R> {}

impl<R> FutureState<R> {
    pub(crate) fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            taken: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    #[inline]
    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Publishes the result. Called at most once, by the completing worker.
    pub(crate) fn set(&self, value: R) {
        // SAFETY: single writer; `ready` has not been set yet, so no reader
        // touches the cell.
        unsafe {
            (*self.value.get()).write(value);
        }
        let was_ready = self.ready.swap(true, Ordering::Release);
        debug_assert!(!was_ready, "task result published twice");
    }

    /// Moves the result out. Requires `is_ready()`.
    pub(crate) fn take(&self) -> R {
        debug_assert!(self.is_ready(), "result taken before completion");
        let already_taken = self.taken.swap(true, Ordering::AcqRel);
        debug_assert!(!already_taken, "task result taken twice");
        // SAFETY: ready was observed with Acquire, the writer is done, and
        // the `taken` swap makes this the only extraction.
        unsafe { (*self.value.get()).assume_init_read() }
    }
}

impl<R> Drop for FutureState<R> {
    fn drop(&mut self) {
        if *self.ready.get_mut() && !*self.taken.get_mut() {
            // SAFETY: a published, untaken value is initialized.
            unsafe {
                (*self.value.get()).assume_init_drop();
            }
        }
    }
}

/// A run-once task producing a value.
pub(crate) struct ScalarTask<F, R> {
    header: TaskHeader,
    func: UnsafeCell<Option<F>>,
    state: Arc<FutureState<R>>,
}

// Safety: `func` is taken exactly once, by the single worker that receives
// the task's only slot; all other access is through &self reads of the
// header.
unsafe impl<F: Send, R: Send> Send for ScalarTask<F, R> {}
unsafe impl<F: Send, R: Send> Sync for ScalarTask<F, R> {}

impl<F, R> ScalarTask<F, R> {
    pub(crate) fn new(header: TaskHeader, func: F, state: Arc<FutureState<R>>) -> Self {
        Self {
            header,
            func: UnsafeCell::new(Some(func)),
            state,
        }
    }
}

impl<F, R> PoolTask for ScalarTask<F, R>
where
    F: FnOnce(i64) -> R + Send,
    R: Send,
{
    fn id(&self) -> i64 {
        self.header.id()
    }

    fn parent_id(&self) -> i64 {
        self.header.parent_id()
    }

    fn run(&self, thread_id: i64, offset: i64) {
        debug_assert_eq!(offset, 0, "scalar task ran with a loop offset");
        self.header.wait_for_parent();
        // SAFETY: a scalar task owns exactly one slot, so exactly one
        // worker reaches this take.
        let func = unsafe { (*self.func.get()).take() };
        if let Some(func) = func {
            let value = func(thread_id);
            self.state.set(value);
        }
    }
}

/// A data-parallel task: one closure invoked for every iteration offset.
/// The future completes when the last reference drops, i.e. when every
/// scheduled iteration has finished.
pub(crate) struct LoopTask<F> {
    header: TaskHeader,
    func: F,
    begin: i64,
    state: Arc<FutureState<()>>,
}

impl<F> LoopTask<F> {
    pub(crate) fn new(header: TaskHeader, func: F, begin: i64, state: Arc<FutureState<()>>) -> Self {
        Self {
            header,
            func,
            begin,
            state,
        }
    }
}

impl<F> PoolTask for LoopTask<F>
where
    F: Fn(i64, i64) + Send + Sync,
{
    fn id(&self) -> i64 {
        self.header.id()
    }

    fn parent_id(&self) -> i64 {
        self.header.parent_id()
    }

    fn run(&self, thread_id: i64, offset: i64) {
        self.header.wait_for_parent();
        (self.func)(self.begin + offset, thread_id);
    }
}

impl<F> Drop for LoopTask<F> {
    fn drop(&mut self) {
        // Completion publishes before the header retires the id.
        self.state.set(());
    }
}
