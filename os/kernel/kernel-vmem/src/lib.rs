//! # Virtual Memory Support
//!
//! The x86-64 page-table manager.
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//!
//!  PML4  →  PDPT  →  PD  →  PT  →  4 KiB frame
//!              │        └── PS=1 → 2 MiB frame
//!              └─────────── PS=1 → 1 GiB frame (boot mappings only)
//! ```
//!
//! Each table is one 4 KiB frame of 512 [`PageTableEntry`] values.
//!
//! ## Hardware boundary
//!
//! The walk logic is ordinary code over three narrow traits, so it runs
//! unchanged against simulated RAM in host tests:
//!
//! | Trait | Kernel implementation | Test implementation |
//! |-------|-----------------------|---------------------|
//! | [`PhysMapper`] | direct-map offset | [`sim::SimulatedRam`] |
//! | [`FrameAlloc`] | bitmap frame allocator | [`sim::BumpFrames`] |
//! | [`Tlb`] | [`HardwareTlb`] (`invlpg`, CR3 reload) | [`sim::RecordingTlb`] |
//!
//! The `sim` module is compiled for this crate's own tests and, for other
//! crates, behind the `test-support` feature.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

#[cfg(any(test, feature = "test-support"))]
extern crate alloc;

mod address_space;
mod entry;
mod error;
mod table;
mod tlb;

#[cfg(any(test, feature = "test-support"))]
pub mod sim;

pub use address_space::AddressSpace;
pub use entry::{PageFlags, PageTableEntry};
pub use error::PageTableError;
pub use table::{ENTRIES, KERNEL_HALF_FIRST_INDEX, PageTable};
pub use tlb::{HardwareTlb, NoopTlb, Tlb};

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Source of zeroable 4 KiB frames for page tables and backed memory.
///
/// Returns `None` when exhausted. Returned frames are exclusively owned by
/// the caller until handed back to whatever allocator produced them.
pub trait FrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;
}

/// Converts physical addresses to usable pointers in the current virtual
/// address space (identity map, or a higher-half direct map in the kernel).
pub trait PhysMapper {
    /// Reference to the `T` stored at physical address `pa`.
    ///
    /// # Safety
    /// - `pa` must be mapped writable in the current address space for `'a`.
    /// - The bytes at `pa` must be a valid `T`, suitably aligned.
    /// - No other live reference may alias the same bytes.
    #[allow(clippy::mut_from_ref)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// `len` consecutive `T` starting at `pa`.
    ///
    /// # Safety
    /// As [`phys_to_mut`](Self::phys_to_mut), for the whole range, which
    /// must be physically contiguous.
    #[allow(clippy::mut_from_ref)]
    unsafe fn phys_to_slice_mut<'a, T>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [T] {
        unsafe {
            let first: *mut T = self.phys_to_mut::<T>(pa);
            core::slice::from_raw_parts_mut(first, len)
        }
    }
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &mut A {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        (**self).alloc_4k()
    }
}
