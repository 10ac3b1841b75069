//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw addresses and page bases used by the
//! frame allocator, the page-table manager and the virtual region allocator.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Physical memory, frames and MMIO windows. |
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Addresses translated by the paging hierarchy. |
//! | [`PageSize`] | Type-level page size marker ([`Size4K`], [`Size2M`], [`Size1G`]). |
//! | [`PageTableLevel`] | One of the four x86-64 paging levels and its 9-bit index slice. |
//!
//! ## Address split
//!
//! ```text
//! | 63‒48  | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! | sign   |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xFFFF_FFFF_8000_1234);
//! assert_eq!(va.table_index(PageTableLevel::Pml4), 511);
//! assert_eq!(va.table_index(PageTableLevel::Pt), 1);
//! assert_eq!(va.page::<Size4K>().base().as_u64(), 0xFFFF_FFFF_8000_1000);
//! assert_eq!(va.offset_in::<Size4K>(), 0x234);
//! ```
//!
//! All types are `#[repr(transparent)]` over `u64` and every alignment helper
//! is a `const fn`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod level;
mod page;
mod page_size;
mod physical_address;
mod virtual_address;

pub use level::PageTableLevel;
pub use page::{PhysicalPage, VirtualPage};
pub use page_size::{PageSize, Size1G, Size2M, Size4K};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Rounds `value` up to the next multiple of `align` (a power of two).
///
/// Returns `None` on overflow.
#[inline]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Rounds `value` down to a multiple of `align` (a power of two).
#[inline]
#[must_use]
pub const fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Number of 4 KiB pages needed to hold `bytes`.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(Size4K::SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_up(0, 4096), Some(0));
        assert_eq!(align_up(1, 4096), Some(4096));
        assert_eq!(align_up(4096, 4096), Some(4096));
        assert_eq!(align_up(u64::MAX, 4096), None);
        assert_eq!(align_down(0x1fff, 4096), 0x1000);
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(8192), 2);
    }

    #[test]
    fn split_and_rejoin() {
        let va = VirtualAddress::new(0x0000_7fff_dead_beef);
        let page = va.page::<Size4K>();
        assert_eq!(page.base() + va.offset_in::<Size4K>(), va);

        let pa = PhysicalAddress::new(0x0000_0010_2000_0042);
        let frame = pa.page::<Size2M>();
        assert_eq!(frame.base().as_u64(), 0x0000_0010_2000_0000);
        assert_eq!(pa.offset_in::<Size2M>(), 0x42);
    }

    #[test]
    fn indices_cover_all_levels() {
        let va = VirtualAddress::new(
            (3 << 39) | (5 << 30) | (7 << 21) | (9 << 12) | 0x123,
        );
        assert_eq!(va.table_index(PageTableLevel::Pml4), 3);
        assert_eq!(va.table_index(PageTableLevel::Pdpt), 5);
        assert_eq!(va.table_index(PageTableLevel::Pd), 7);
        assert_eq!(va.table_index(PageTableLevel::Pt), 9);
    }

    #[test]
    fn canonical_form() {
        assert!(VirtualAddress::new(0x0000_7fff_ffff_ffff).is_canonical());
        assert!(VirtualAddress::new(0xffff_8000_0000_0000).is_canonical());
        assert!(!VirtualAddress::new(0x0000_8000_0000_0000).is_canonical());
        assert_eq!(
            VirtualAddress::from_indices(511, 510, 0, 0).as_u64(),
            0xffff_ffff_8000_0000
        );
    }
}
