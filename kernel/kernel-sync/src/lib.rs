//! # Kernel synchronization primitives

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod phased_lock;
mod raw_spin;

pub use phased_lock::PhasedLock;
pub use raw_spin::RawSpin;
