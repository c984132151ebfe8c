use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Minimal test-and-test-and-set spin lock.
///
/// Suitable for short, O(1) critical sections only; blocked contenders
/// busy-wait. There is no fairness and no timeout.
pub struct RawSpin {
    held: AtomicBool,
}

impl Default for RawSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSpin {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Spin until the lock is acquired.
    #[inline]
    pub fn lock(&self) {
        // Try once, then spin on a plain read before retrying the swap.
        while self.held.swap(true, Ordering::Acquire) {
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    /// Try once; `true` if the lock was acquired.
    #[inline]
    pub fn try_lock(&self) -> bool {
        !self.held.swap(true, Ordering::Acquire)
    }

    /// Release the lock.
    ///
    /// # Safety
    /// The caller must currently hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        // Release publishes the critical section.
        self.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_excludes() {
        let lock = RawSpin::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        unsafe { lock.unlock() };
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }

    #[test]
    fn lock_after_unlock() {
        let lock = RawSpin::new();
        lock.lock();
        unsafe { lock.unlock() };
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }
}
