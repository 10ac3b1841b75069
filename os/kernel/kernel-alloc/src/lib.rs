//! # Kernel Memory Allocation
//!
//! Physical frames and virtual ranges, the two resources every address space
//! is built from.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        Virtual Memory Region Allocator (vm)         │
//! │   free-range list per address space, ASLR choice    │
//! └───────────────┬─────────────────────┬───────────────┘
//!                 │ map / unmap         │ frames
//! ┌───────────────▼──────────┐ ┌────────▼───────────────┐
//! │ kernel-vmem AddressSpace │ │ Bitmap Frame Allocator │
//! └───────────────┬──────────┘ └────────────────────────┘
//!                 │ table frames
//! ┌───────────────▼──────────┐
//! │ PhysMapper (direct map)  │
//! └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`frame_alloc`]: one bit per 4 KiB frame, forward-scanning cursor that
//!   resets on every free.
//! - [`vm`]: index-linked free-region list over a fixed slot pool, plus
//!   backed, fixed-address and MMIO allocation on top of a page table.
//! - [`random`]: ChaCha20 keystream behind the [`random::RandomSource`]
//!   trait, used for placement.
//! - [`phys_mapper`]: the kernel's direct-map [`kernel_vmem::PhysMapper`].
//!
//! None of this touches hardware directly. Page tables are reached through
//! a `PhysMapper` and TLB invalidation goes through `kernel_vmem::Tlb`, so
//! the whole crate runs against simulated RAM in host tests.

#![cfg_attr(not(test), no_std)]

pub mod frame_alloc;
pub mod phys_mapper;
pub mod random;
pub mod vm;

pub use frame_alloc::{BitmapFrameAllocator, FrameAllocError};
pub use random::{ChaCha20Rng, RandomSource};
pub use vm::{RegionList, RegionSlot, VirtualMemoryAllocator, VmContext, VmError};
