use crate::config::{CACHE_SLOTS, CACHE_THRESHOLD};
use kernel_phys_addresses::PhysicalFrame;

/// Bounded array of free frames, the O(1)-ish fast path in front of the
/// free list.
///
/// Slots hold real frame addresses. The cache starts inactive, is activated
/// once at the end of full bootstrap, and deactivates itself permanently the
/// first time it is found exhausted in either direction: a release once
/// occupancy has reached [`CACHE_THRESHOLD`] (or no slot is empty), or a
/// take when no slot is occupied. After that the pool runs on the free list
/// alone; frames still parked in slots are recovered via [`drain_one`](Self::drain_one).
pub(crate) struct SlotCache {
    slots: [Option<PhysicalFrame>; CACHE_SLOTS],
    occupied: usize,
    active: bool,
}

impl SlotCache {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [None; CACHE_SLOTS],
            occupied: 0,
            active: false,
        }
    }

    /// Called once when full bootstrap completes.
    pub(crate) const fn activate(&mut self) {
        self.active = true;
    }

    pub(crate) const fn is_active(&self) -> bool {
        self.active
    }

    /// Record `frame` in an empty slot.
    ///
    /// Returns `false` (and deactivates the cache) if the cache is at its
    /// threshold or no slot is empty; the caller must then push the frame
    /// onto the free list. Returns `false` without side effects when already
    /// inactive.
    pub(crate) fn try_put(&mut self, frame: PhysicalFrame) -> bool {
        if !self.active {
            return false;
        }
        if self.occupied >= CACHE_THRESHOLD {
            self.active = false;
            return false;
        }
        for slot in &mut self.slots {
            if slot.is_none() {
                *slot = Some(frame);
                self.occupied += 1;
                return true;
            }
        }
        self.active = false;
        false
    }

    /// Take any cached frame.
    ///
    /// Returns `None` when inactive, or when no slot is occupied (in which
    /// case the cache deactivates itself and the caller falls back to the
    /// free list).
    pub(crate) fn try_take(&mut self) -> Option<PhysicalFrame> {
        if !self.active {
            return None;
        }
        for slot in &mut self.slots {
            if let Some(frame) = slot.take() {
                self.occupied -= 1;
                return Some(frame);
            }
        }
        self.active = false;
        None
    }

    /// Remove one cached frame regardless of the active flag. Used after
    /// deactivation to hand leftover frames back to the free list so none
    /// leak.
    pub(crate) fn drain_one(&mut self) -> Option<PhysicalFrame> {
        for slot in &mut self.slots {
            if let Some(frame) = slot.take() {
                self.occupied -= 1;
                return Some(frame);
            }
        }
        None
    }

    #[cfg(test)]
    pub(crate) const fn occupancy(&self) -> usize {
        self.occupied
    }
}
