use std::sync::atomic::{AtomicI32, Ordering};

#[cfg(not(target_os = "linux"))]
use std::sync::{Condvar, Mutex, PoisonError};

/// Portable atomic `i32` with blocking wait and wake.
///
/// On Linux the wait maps directly onto the futex syscall; elsewhere an
/// internal mutex + condition variable pair provides the same observable
/// contract. Spurious wakeups are permitted either way: `wait` returns only
/// when the observed value differs from `expected`, and `notify_*`
/// synchronizes-with the release store that changed the value.
pub struct AtomicWord {
    word: AtomicI32,
    #[cfg(not(target_os = "linux"))]
    monitor: Monitor,
}

#[cfg(not(target_os = "linux"))]
struct Monitor {
    lock: Mutex<()>,
    condition: Condvar,
}

impl AtomicWord {
    pub const fn new(value: i32) -> Self {
        Self {
            word: AtomicI32::new(value),
            #[cfg(not(target_os = "linux"))]
            monitor: Monitor {
                lock: Mutex::new(()),
                condition: Condvar::new(),
            },
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> i32 {
        self.word.load(order)
    }

    #[inline]
    pub fn store(&self, value: i32, order: Ordering) {
        self.word.store(value, order);
    }

    #[inline]
    pub fn fetch_add(&self, value: i32, order: Ordering) -> i32 {
        self.word.fetch_add(value, order)
    }

    #[inline]
    pub fn fetch_sub(&self, value: i32, order: Ordering) -> i32 {
        self.word.fetch_sub(value, order)
    }

    /// Blocks the calling thread as long as the observed value equals
    /// `expected`.
    #[cfg(target_os = "linux")]
    pub fn wait(&self, expected: i32, order: Ordering) {
        while self.word.load(order) == expected {
            // SAFETY: the futex word is a valid, aligned, live i32 for the
            // duration of the call; FUTEX_WAIT re-checks the value under the
            // kernel's lock, so a wake between our load and the syscall is
            // not lost.
            unsafe {
                libc::syscall(
                    libc::SYS_futex,
                    self.word.as_ptr(),
                    libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                    expected,
                    std::ptr::null::<libc::timespec>(),
                );
            }
        }
    }

    /// Blocks the calling thread as long as the observed value equals
    /// `expected`.
    #[cfg(not(target_os = "linux"))]
    pub fn wait(&self, expected: i32, order: Ordering) {
        let mut guard = self
            .monitor
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while self.word.load(order) == expected {
            guard = self
                .monitor
                .condition
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wakes one waiter.
    #[cfg(target_os = "linux")]
    pub fn notify_one(&self) {
        self.futex_wake(1);
    }

    /// Wakes every waiter.
    #[cfg(target_os = "linux")]
    pub fn notify_all(&self) {
        self.futex_wake(i32::MAX);
    }

    #[cfg(target_os = "linux")]
    fn futex_wake(&self, count: i32) {
        // SAFETY: same futex word as in `wait`; waking is always sound.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.word.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
            );
        }
    }

    /// Wakes one waiter.
    #[cfg(not(target_os = "linux"))]
    pub fn notify_one(&self) {
        // Taking the monitor lock pairs with the waiter's check-then-wait:
        // a waiter that already observed the old value is either inside
        // `Condvar::wait` or still holds the lock, never in between.
        drop(
            self.monitor
                .lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        self.monitor.condition.notify_one();
    }

    /// Wakes every waiter.
    #[cfg(not(target_os = "linux"))]
    pub fn notify_all(&self) {
        drop(
            self.monitor
                .lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        self.monitor.condition.notify_all();
    }
}

impl Default for AtomicWord {
    fn default() -> Self {
        Self::new(0)
    }
}
