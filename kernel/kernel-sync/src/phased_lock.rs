use crate::RawSpin;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// A spin lock whose locking can be switched on partway through boot.
///
/// Early kernel initialization runs on a single core with interrupts off, so
/// taking a lock there buys nothing and can deadlock re-entrant boot paths.
/// A `PhasedLock` starts *disabled*: [`with_exclusive`](Self::with_exclusive)
/// runs the closure directly. Once [`enable`](Self::enable) is called (when
/// further cores may start touching the value), every subsequent
/// `with_exclusive` acquires the inner spin lock for the duration of the
/// closure. Enabling is one-way.
///
/// # Invariants
/// - Before `enable()`, at most one execution context may call
///   `with_exclusive`. This is a structural guarantee the caller provides
///   (single core, no interrupt-context use); it is not checked.
/// - Not reentrant: calling `with_exclusive` from within the closure
///   deadlocks once enabled.
pub struct PhasedLock<T> {
    raw: RawSpin,
    enabled: AtomicBool,
    cell: UnsafeCell<T>,
}

// Safety: mutual exclusion once enabled; before that the single-context
// invariant above makes the value effectively thread-local.
unsafe impl<T: Send> Sync for PhasedLock<T> {}
unsafe impl<T: Send> Send for PhasedLock<T> {}

/// Releases the raw lock when the closure returns (or unwinds, in tests).
struct UnlockOnDrop<'a>(&'a RawSpin);

impl Drop for UnlockOnDrop<'_> {
    fn drop(&mut self) {
        // Safety: constructed only after `lock()` succeeded.
        unsafe { self.0.unlock() }
    }
}

impl<T> PhasedLock<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawSpin::new(),
            enabled: AtomicBool::new(false),
            cell: UnsafeCell::new(value),
        }
    }

    /// Switch locking on. One-way; there is no `disable`.
    #[inline]
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Run `f` with exclusive access to the value.
    ///
    /// Spins for the lock when enabled; runs `f` directly otherwise (see the
    /// type-level invariants).
    #[inline]
    pub fn with_exclusive<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        if self.is_enabled() {
            self.raw.lock();
            let _unlock = UnlockOnDrop(&self.raw);
            // Safety: we hold the raw lock.
            f(unsafe { &mut *self.cell.get() })
        } else {
            // Safety: single-context phase; see type invariants.
            f(unsafe { &mut *self.cell.get() })
        }
    }

    /// Direct access through `&mut self`; no locking needed.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }
}
