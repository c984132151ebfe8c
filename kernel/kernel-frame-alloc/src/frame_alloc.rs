use crate::config::{FRAME_BYTES, POISON_BYTE};
use crate::free_list::FreeList;
use crate::slot_cache::SlotCache;
use core::ptr;
use kernel_phys_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame};
use kernel_sync::PhasedLock;
use log::{debug, error, info};

/// How far through the two-phase bootstrap the pool is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum BootPhase {
    Uninitialized,
    Early,
    Full,
}

/// The mutable pool, always accessed through the allocator's [`PhasedLock`].
struct Pool {
    phase: BootPhase,
    cache: SlotCache,
    list: FreeList,
}

/// Misuse of the two-phase bootstrap sequence.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    #[error("early bootstrap already ran")]
    EarlyAlreadyRan,
    #[error("full bootstrap requires early bootstrap first")]
    EarlyNotRun,
    #[error("full bootstrap already ran")]
    FullAlreadyRan,
}

/// Consumer-facing seam for subsystems that need physical frames (page-table
/// construction, stack setup, pipe buffers). Keeps callers oblivious of the
/// cache/list split.
pub trait FrameSource {
    /// One frame, or `None` when physical memory is exhausted.
    fn alloc_frame(&self) -> Option<PhysicalFrame>;

    /// Return a frame to the pool.
    ///
    /// # Safety
    /// `addr` must be the base of a frame previously obtained from this
    /// source and no longer referenced anywhere.
    unsafe fn free_frame(&self, addr: PhysicalAddress);
}

/// Page-granular physical memory allocator.
///
/// One instance manages the frames in `[kernel_end, phys_top)` for the
/// lifetime of the kernel. Zero frames are usable until the boot path has
/// run [`bootstrap_early`](Self::bootstrap_early) and
/// [`bootstrap_full`](Self::bootstrap_full), in that order, exactly once
/// each.
///
/// The allocator assumes the managed range is directly addressable (identity
/// or direct-map), like the rest of early kernel memory code: free frames
/// store their own list links, and freed frames are poisoned in place.
pub struct FrameAllocator {
    kernel_end: PhysicalAddress,
    phys_top: PhysicalAddress,
    pool: PhasedLock<Pool>,
}

impl FrameAllocator {
    /// A new, empty allocator managing `[kernel_end, phys_top)`.
    ///
    /// `const` so the kernel can keep its single instance in a `static`.
    #[must_use]
    pub const fn new(kernel_end: PhysicalAddress, phys_top: PhysicalAddress) -> Self {
        Self {
            kernel_end,
            phys_top,
            pool: PhasedLock::new(Pool {
                phase: BootPhase::Uninitialized,
                cache: SlotCache::new(),
                list: FreeList::new(),
            }),
        }
    }

    /// Phase 1: seed the range covered by the minimal boot mapping.
    ///
    /// Locking stays disabled; only the boot core is running at this point.
    /// Returns the number of frames seeded.
    ///
    /// # Safety
    /// - Exactly one execution context may touch the allocator until
    ///   [`bootstrap_full`](Self::bootstrap_full) has completed.
    /// - Every whole frame in `[start, end)` must lie inside the managed
    ///   range, be unused, and be writable through the current mapping.
    pub unsafe fn bootstrap_early(
        &self,
        start: PhysicalAddress,
        end: PhysicalAddress,
    ) -> Result<usize, BootstrapError> {
        self.pool.with_exclusive(|pool| {
            if pool.phase != BootPhase::Uninitialized {
                return Err(BootstrapError::EarlyAlreadyRan);
            }
            let seeded = unsafe { self.seed_range(pool, start, end) };
            pool.phase = BootPhase::Early;
            info!("early bootstrap: {seeded} frames from [{start}, {end})");
            Ok(seeded)
        })
    }

    /// Phase 2: seed the rest of physical memory, then switch to locked
    /// operation and activate the slot cache.
    ///
    /// Returns the number of frames seeded. After this call the allocator is
    /// safe to use from every core.
    ///
    /// # Safety
    /// - Must still be called from the single bootstrap context.
    /// - Every whole frame in `[start, end)` must lie inside the managed
    ///   range, be unused, and be mapped on all cores.
    pub unsafe fn bootstrap_full(
        &self,
        start: PhysicalAddress,
        end: PhysicalAddress,
    ) -> Result<usize, BootstrapError> {
        let seeded = self.pool.with_exclusive(|pool| {
            match pool.phase {
                BootPhase::Early => {}
                BootPhase::Uninitialized => return Err(BootstrapError::EarlyNotRun),
                BootPhase::Full => return Err(BootstrapError::FullAlreadyRan),
            }
            let seeded = unsafe { self.seed_range(pool, start, end) };
            pool.phase = BootPhase::Full;
            pool.cache.activate();
            Ok(seeded)
        })?;
        // Lock discipline starts here; everything above ran single-context.
        self.pool.enable();
        info!("full bootstrap: {seeded} frames from [{start}, {end}); locking enabled, cache active");
        Ok(seeded)
    }

    /// Allocate one 4096-byte frame.
    ///
    /// Tries the slot cache first while it is active, then the free list.
    /// `None` means exhaustion, a normal outcome the caller must handle.
    #[must_use]
    pub fn alloc_frame(&self) -> Option<PhysicalFrame> {
        self.pool.with_exclusive(|pool| {
            if pool.cache.is_active() {
                if let Some(frame) = pool.cache.try_take() {
                    return Some(frame);
                }
                Self::retire_cache(pool);
            }
            pool.list.pop()
        })
    }

    /// Return the frame at `addr` to the pool.
    ///
    /// The frame's entire contents are overwritten with [`POISON_BYTE`]
    /// before it is linked back in, so dangling references read junk.
    ///
    /// A misaligned address, or one outside `[kernel_end, phys_top)`, means
    /// a caller has corrupted its bookkeeping; that is unrecoverable and
    /// halts the kernel.
    ///
    /// # Safety
    /// `addr` must be the base of a frame previously returned by
    /// [`alloc_frame`](Self::alloc_frame) (or seeded during bootstrap and
    /// handed out since), with no live references into it.
    pub unsafe fn free_frame(&self, addr: PhysicalAddress) {
        let frame = self.check_frame(addr);
        // Poison outside the critical section; the frame stays exclusively
        // the caller's until it is linked back into the pool.
        unsafe { Self::poison(frame) };
        self.pool.with_exclusive(|pool| {
            if pool.cache.is_active() {
                if pool.cache.try_put(frame) {
                    return;
                }
                Self::retire_cache(pool);
            }
            unsafe { pool.list.push(frame) };
        });
    }

    /// Walk `[start, end)` and seed every whole frame into the pool.
    ///
    /// `start` is rounded up to the next frame boundary; a trailing partial
    /// frame is discarded.
    ///
    /// # Safety
    /// Same access requirements as the bootstrap calls; must run inside the
    /// pool's critical section.
    unsafe fn seed_range(
        &self,
        pool: &mut Pool,
        start: PhysicalAddress,
        end: PhysicalAddress,
    ) -> usize {
        let mut base = start.align_up_frame();
        let mut seeded = 0usize;
        while base.as_u64() + FRAME_SIZE <= end.as_u64() {
            let frame = self.check_frame(base);
            unsafe {
                Self::poison(frame);
                pool.list.push(frame);
            }
            base += FRAME_SIZE;
            seeded += 1;
        }
        seeded
    }

    /// Validate a frame address or halt.
    fn check_frame(&self, addr: PhysicalAddress) -> PhysicalFrame {
        let in_bounds = self.kernel_end <= addr && addr < self.phys_top;
        match PhysicalFrame::from_base(addr) {
            Some(frame) if in_bounds => frame,
            _ => {
                error!(
                    "invalid frame address {addr}: must be frame-aligned and within [{}, {})",
                    self.kernel_end, self.phys_top
                );
                panic!("invalid frame address {addr}");
            }
        }
    }

    /// Overwrite the frame's contents with the poison pattern.
    ///
    /// # Safety
    /// The frame must be owned by the caller (just validated for free, or
    /// being seeded) and writable through the current mapping.
    unsafe fn poison(frame: PhysicalFrame) {
        unsafe {
            ptr::write_bytes(frame.base().as_mut_ptr::<u8>(), POISON_BYTE, FRAME_BYTES);
        }
    }

    /// The cache just deactivated itself; move any frames still parked in
    /// its slots onto the free list so none are lost.
    fn retire_cache(pool: &mut Pool) {
        let mut recovered = 0usize;
        while let Some(frame) = pool.cache.drain_one() {
            // Safety: cached frames are free frames owned by the pool.
            unsafe { pool.list.push(frame) };
            recovered += 1;
        }
        debug!("slot cache exhausted, free list only from here on ({recovered} frames recovered)");
    }
}

impl FrameSource for FrameAllocator {
    fn alloc_frame(&self) -> Option<PhysicalFrame> {
        FrameAllocator::alloc_frame(self)
    }

    unsafe fn free_frame(&self, addr: PhysicalAddress) {
        unsafe { FrameAllocator::free_frame(self, addr) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CACHE_THRESHOLD, POISON_BYTE};
    use std::collections::BTreeSet;

    /// Frame-aligned backing memory standing in for a physical range.
    struct Arena {
        #[allow(dead_code)]
        mem: Vec<u8>,
        start: PhysicalAddress,
        end: PhysicalAddress,
    }

    fn arena(frames: u64) -> Arena {
        let mem = vec![0u8; ((frames + 1) * FRAME_SIZE) as usize];
        let start = PhysicalAddress::from_ptr(mem.as_ptr()).align_up_frame();
        let end = start + frames * FRAME_SIZE;
        Arena { mem, start, end }
    }

    fn early_only(a: &Arena) -> FrameAllocator {
        let alloc = FrameAllocator::new(a.start, a.end);
        unsafe { alloc.bootstrap_early(a.start, a.end).unwrap() };
        alloc
    }

    fn cache_active(alloc: &FrameAllocator) -> bool {
        alloc.pool.with_exclusive(|pool| pool.cache.is_active())
    }

    #[test]
    fn scenario_a_ten_frames_then_exhausted() {
        let a = arena(10);
        let alloc = early_only(&a);
        let mut seen = BTreeSet::new();
        for _ in 0..10 {
            let frame = alloc.alloc_frame().expect("pool should hold 10 frames");
            assert!(frame.base().is_frame_aligned());
            assert!(a.start <= frame.base() && frame.base() < a.end);
            assert!(seen.insert(frame), "frame {frame:?} issued twice");
        }
        assert_eq!(alloc.alloc_frame(), None);
    }

    #[test]
    fn early_seeding_rounds_up_and_drops_partial_tail() {
        let a = arena(4);
        let alloc = FrameAllocator::new(a.start, a.end);
        // Unaligned start, end cutting off half of the last frame.
        let seeded = unsafe {
            alloc
                .bootstrap_early(a.start + 8, a.end + FRAME_SIZE - 8)
                .unwrap()
        };
        // Frame 0 is lost to rounding up, the trailing partial one discarded.
        assert_eq!(seeded, 3);
    }

    #[test]
    fn conservation_across_both_phases() {
        let a = arena(32);
        let mid = a.start + 8 * FRAME_SIZE;
        let alloc = FrameAllocator::new(a.start, a.end);
        let n1 = unsafe { alloc.bootstrap_early(a.start, mid).unwrap() };
        let n2 = unsafe { alloc.bootstrap_full(mid, a.end).unwrap() };
        assert_eq!(n1 + n2, 32);
        let mut seen = BTreeSet::new();
        while let Some(frame) = alloc.alloc_frame() {
            assert!(seen.insert(frame));
        }
        assert_eq!(seen.len(), 32);
        assert_eq!(alloc.alloc_frame(), None);
    }

    #[test]
    fn round_trip_reuses_lifo() {
        let a = arena(4);
        let alloc = early_only(&a);
        let frame = alloc.alloc_frame().unwrap();
        unsafe { alloc.free_frame(frame.base()) };
        // LIFO: the just-freed frame comes back first.
        assert_eq!(alloc.alloc_frame(), Some(frame));
    }

    #[test]
    fn freed_frame_is_poisoned() {
        let a = arena(2);
        let alloc = early_only(&a);
        let frame = alloc.alloc_frame().unwrap();
        unsafe {
            frame.base().as_mut_ptr::<u8>().write_bytes(0xAB, FRAME_BYTES);
            alloc.free_frame(frame.base());
        }
        let bytes =
            unsafe { core::slice::from_raw_parts(frame.base().as_mut_ptr::<u8>(), FRAME_BYTES) };
        // The free-list link occupies the first word; everything after it
        // must carry the poison pattern.
        assert!(bytes[size_of::<usize>()..].iter().all(|&b| b == POISON_BYTE));
    }

    #[test]
    fn cache_held_frame_is_fully_poisoned() {
        let a = arena(12);
        let mid = a.start + 8 * FRAME_SIZE;
        let alloc = FrameAllocator::new(a.start, a.end);
        unsafe { alloc.bootstrap_early(a.start, mid).unwrap() };
        let frame = alloc.alloc_frame().unwrap();
        unsafe { alloc.bootstrap_full(mid, a.end).unwrap() };
        unsafe {
            frame.base().as_mut_ptr::<u8>().write_bytes(0xCD, FRAME_BYTES);
            // Goes into the cache, so not even the first word is reused.
            alloc.free_frame(frame.base());
        }
        let bytes =
            unsafe { core::slice::from_raw_parts(frame.base().as_mut_ptr::<u8>(), FRAME_BYTES) };
        assert!(bytes.iter().all(|&b| b == POISON_BYTE));
    }

    #[test]
    #[should_panic(expected = "invalid frame address")]
    fn free_misaligned_halts() {
        let a = arena(2);
        let alloc = early_only(&a);
        unsafe { alloc.free_frame(a.start + 8) };
    }

    #[test]
    #[should_panic(expected = "invalid frame address")]
    fn free_below_managed_range_halts() {
        let a = arena(2);
        let alloc = early_only(&a);
        unsafe { alloc.free_frame(PhysicalAddress::zero()) };
    }

    #[test]
    #[should_panic(expected = "invalid frame address")]
    fn free_at_ceiling_halts() {
        let a = arena(2);
        let alloc = early_only(&a);
        unsafe { alloc.free_frame(a.end) };
    }

    #[test]
    fn bootstrap_misuse_is_reported() {
        let a = arena(4);
        let alloc = FrameAllocator::new(a.start, a.end);
        assert_eq!(
            unsafe { alloc.bootstrap_full(a.start, a.end) },
            Err(BootstrapError::EarlyNotRun)
        );
        unsafe { alloc.bootstrap_early(a.start, a.end).unwrap() };
        assert_eq!(
            unsafe { alloc.bootstrap_early(a.start, a.end) },
            Err(BootstrapError::EarlyAlreadyRan)
        );
        unsafe { alloc.bootstrap_full(a.start, a.end).unwrap() };
        assert_eq!(
            unsafe { alloc.bootstrap_full(a.start, a.end) },
            Err(BootstrapError::FullAlreadyRan)
        );
    }

    #[test]
    fn scenario_b_cache_fast_path_then_one_way_fallback() {
        let a = arena(40);
        let mid = a.start + 8 * FRAME_SIZE;
        let alloc = FrameAllocator::new(a.start, a.end);
        unsafe { alloc.bootstrap_early(a.start, mid).unwrap() };

        // Frames handed out during phase 1, as for early page tables.
        let early: Vec<PhysicalFrame> = (0..5).map(|_| alloc.alloc_frame().unwrap()).collect();

        unsafe { alloc.bootstrap_full(mid, a.end).unwrap() };
        assert!(cache_active(&alloc));

        // Freed frames land in the cache and come back out of it first.
        for frame in &early {
            unsafe { alloc.free_frame(frame.base()) };
        }
        let mut live = BTreeSet::new();
        for _ in 0..5 {
            assert!(live.insert(alloc.alloc_frame().unwrap()));
        }
        assert!(cache_active(&alloc), "cache must stay active while it can serve");
        assert_eq!(live, early.iter().copied().collect::<BTreeSet<_>>());

        // First take on the drained cache flips the allocator to list-only,
        // in the same operation that falls back to the list.
        assert!(live.insert(alloc.alloc_frame().unwrap()));
        assert!(!cache_active(&alloc));

        // Interleave allocs and frees; no address may be live twice, and the
        // mode never flips back.
        for round in 0..150 {
            if round % 3 == 2 {
                let frame = *live.iter().next().unwrap();
                live.remove(&frame);
                unsafe { alloc.free_frame(frame.base()) };
            } else if let Some(frame) = alloc.alloc_frame() {
                assert!(live.insert(frame), "frame {frame:?} issued while live");
            }
            assert!(!cache_active(&alloc));
        }
    }

    #[test]
    fn cache_threshold_spills_to_free_list_without_losing_frames() {
        let a = arena(100);
        let mid = a.start + 90 * FRAME_SIZE;
        let alloc = FrameAllocator::new(a.start, a.end);
        unsafe { alloc.bootstrap_early(a.start, mid).unwrap() };
        let held: Vec<PhysicalFrame> = (0..85).map(|_| alloc.alloc_frame().unwrap()).collect();
        unsafe { alloc.bootstrap_full(mid, a.end).unwrap() };

        for (i, frame) in held.iter().enumerate() {
            unsafe { alloc.free_frame(frame.base()) };
            // The release that finds the cache at its threshold deactivates
            // it; everything after goes straight to the list.
            assert_eq!(cache_active(&alloc), i + 1 <= CACHE_THRESHOLD);
        }
        assert!(!cache_active(&alloc));

        // Nothing leaked through the transition: every frame is allocatable.
        let mut seen = BTreeSet::new();
        while let Some(frame) = alloc.alloc_frame() {
            assert!(seen.insert(frame));
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn frame_source_seam() {
        fn grab<S: FrameSource>(source: &S) -> Option<PhysicalFrame> {
            source.alloc_frame()
        }
        let a = arena(2);
        let alloc = early_only(&a);
        let frame = grab(&alloc).unwrap();
        unsafe { FrameSource::free_frame(&alloc, frame.base()) };
        assert_eq!(grab(&alloc), Some(frame));
    }
}
