//! # Physical Addresses and Frames
//!
//! Strongly typed wrappers for the raw physical addresses handled by the
//! frame allocator.
//!
//! Two principal types are provided:
//!
//! | Type | Meaning |
//! |-------|----------|
//! | [`PhysicalAddress`] | An arbitrary 64-bit physical address. |
//! | [`PhysicalFrame`] | The frame-aligned base address of a 4 KiB frame. |
//!
//! Both are `#[repr(transparent)]` wrappers around `u64` and therefore free
//! at runtime; the point is to make "some address" and "the base of a frame
//! we own" distinct at compile time. A [`PhysicalFrame`] can only be obtained
//! through [`PhysicalFrame::from_base`] (checked) or
//! [`PhysicalFrame::containing`] (aligning), so code holding one may rely on
//! its alignment.
//!
//! All alignment math is `const fn` and uses the power-of-two mask form.

#![cfg_attr(not(any(test, doctest)), no_std)]

use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Size of a physical frame in bytes.
pub const FRAME_SIZE: u64 = 4096;

/// log2([`FRAME_SIZE`]), i.e. the number of low offset bits.
pub const FRAME_SHIFT: u32 = 12;

const _: () = {
    assert!(FRAME_SIZE.is_power_of_two());
    assert!(1 << FRAME_SHIFT == FRAME_SIZE);
    // Addresses round-trip through pointers; this crate assumes a 64-bit target.
    assert!(size_of::<*const ()>() == size_of::<u64>());
};

/// A raw physical memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr.addr() as u64)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Reinterpret the address as a raw pointer.
    ///
    /// Whether the result may actually be dereferenced depends entirely on
    /// the mapping the caller has established for this address.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as usize as *mut T
    }

    /// Round down to the nearest frame boundary.
    #[inline]
    #[must_use]
    pub const fn align_down_frame(self) -> Self {
        Self(self.0 & !(FRAME_SIZE - 1))
    }

    /// Round up to the nearest frame boundary.
    #[inline]
    #[must_use]
    pub const fn align_up_frame(self) -> Self {
        Self((self.0 + (FRAME_SIZE - 1)) & !(FRAME_SIZE - 1))
    }

    #[inline]
    #[must_use]
    pub const fn is_frame_aligned(self) -> bool {
        self.0 & (FRAME_SIZE - 1) == 0
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// The frame-aligned base address of one 4 KiB physical frame.
///
/// Holding a `PhysicalFrame` asserts alignment, nothing more; ownership of
/// the frame's storage is tracked by whoever hands these out.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalFrame(PhysicalAddress);

impl PhysicalFrame {
    /// Use `addr` as a frame base; `None` if it is not frame-aligned.
    #[inline]
    #[must_use]
    pub const fn from_base(addr: PhysicalAddress) -> Option<Self> {
        if addr.is_frame_aligned() {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// The frame containing `addr` (i.e. `addr` rounded down).
    #[inline]
    #[must_use]
    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self(addr.align_down_frame())
    }

    /// Base address of the frame (always frame-aligned).
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        self.0
    }

    /// One past the last byte of the frame.
    #[inline]
    #[must_use]
    pub const fn end(self) -> PhysicalAddress {
        PhysicalAddress(self.0.0 + FRAME_SIZE)
    }
}

impl fmt::Debug for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(0x{:016X})", self.0.0)
    }
}

impl fmt::Display for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<PhysicalFrame> for PhysicalAddress {
    #[inline]
    fn from(frame: PhysicalFrame) -> Self {
        frame.base()
    }
}
