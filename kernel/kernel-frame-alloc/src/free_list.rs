use core::ptr::{self, null_mut};
use kernel_phys_addresses::{PhysicalAddress, PhysicalFrame};

/// Link stored at the start of every **free** frame.
///
/// A free frame's storage is inert, so its first machine word is reused as
/// the list link:
///
/// ```text
/// +----------+------------------------------------+
/// | FreeNode |      rest of the frame (unused)    |
/// +----------+------------------------------------+
/// ^ frame base
/// ```
///
/// This aliasing is only valid while the frame is on the list; the node is
/// dead the moment [`FreeList::pop`] hands the frame out.
#[repr(transparent)]
struct FreeNode {
    next: *mut FreeNode,
}

/// Intrusive LIFO list of free frames.
///
/// Push and pop are O(1); the most recently freed frame is allocated first.
/// No coalescing and no ordering by address.
///
/// # Invariants
/// - Every node pointer is the frame-aligned base of a free frame owned by
///   the pool.
/// - Raw pointers are only touched while the caller holds the pool's lock
///   (or during single-context bootstrap).
pub(crate) struct FreeList {
    head: *mut FreeNode,
}

// Safety: the list is only accessed under the pool's mutual exclusion.
unsafe impl Send for FreeList {}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: null_mut() }
    }

    /// Link `frame` in as the new head.
    ///
    /// # Safety
    /// - `frame` must be a free frame owned by the pool, not currently on the
    ///   list or in the cache, and its storage must be writable through an
    ///   identity/direct mapping.
    pub(crate) unsafe fn push(&mut self, frame: PhysicalFrame) {
        let node: *mut FreeNode = frame.base().as_mut_ptr();
        unsafe {
            ptr::write(node, FreeNode { next: self.head });
        }
        self.head = node;
    }

    /// Detach and return the head frame, or `None` if the list is empty.
    pub(crate) fn pop(&mut self) -> Option<PhysicalFrame> {
        if self.head.is_null() {
            return None;
        }
        let node = self.head;
        // Safety: `push` wrote a valid node at a frame base it owned, and
        // nothing else touches free-frame storage while it is on the list.
        self.head = unsafe { (*node).next };
        // Node pointers are frame-aligned by the push contract.
        Some(PhysicalFrame::containing(PhysicalAddress::from_ptr(node)))
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.head.is_null()
    }
}
