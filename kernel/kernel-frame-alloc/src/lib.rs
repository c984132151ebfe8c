//! # Physical Frame Allocator
//!
//! Hands out and reclaims 4 KiB physical memory frames for the rest of the
//! kernel (page tables, process stacks, pipe buffers). Always one frame at a
//! time; no coalescing, no statistics.
//!
//! ## Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 FrameAllocator                   │
//! │   alloc_frame / free_frame / bootstrap_early,    │
//! │   bootstrap_full        (PhasedLock critical     │
//! │                          section around Pool)    │
//! ├──────────────────────────┬───────────────────────┤
//! │        SlotCache         │       FreeList        │
//! │  bounded array fast path │  intrusive LIFO list, │
//! │  (capacity 100, one-way  │  next link stored in  │
//! │   deactivation)          │  the free frame itself│
//! └──────────────────────────┴───────────────────────┘
//! ```
//!
//! ## Bootstrap
//!
//! Initialization happens in two phases, mirroring how the boot path brings
//! up paging:
//!
//! 1. [`FrameAllocator::bootstrap_early`] seeds the small range already
//!    mapped by the boot page tables. Only one core is running, so the pool
//!    lock stays disabled.
//! 2. [`FrameAllocator::bootstrap_full`] seeds the rest of physical memory
//!    once the full mapping is installed on all cores, then enables locking
//!    and activates the slot cache.
//!
//! Allocator mode over a boot:
//!
//! ```text
//! Uninitialized → Phase1 (no lock) → Phase2 (lock + cache)
//!                                         │ cache first found full/empty
//!                                         ▼
//!                                     ListOnly (cache off for good)
//! ```
//!
//! ## Failure model
//!
//! Running out of frames is a normal outcome (`alloc_frame` returns `None`).
//! Freeing a misaligned or out-of-range address is caller corruption and
//! halts the kernel.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod config;
mod frame_alloc;
mod free_list;
mod slot_cache;

pub use frame_alloc::{BootstrapError, FrameAllocator, FrameSource};
