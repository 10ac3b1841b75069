use bitfield_struct::bitfield;
use core::fmt;
use core::ops::{BitOr, BitOrAssign};
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage};

/// Bits 12..=51 of an entry.
const ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Permission and caching bits of a page-table entry.
///
/// Same bit positions as [`PageTableEntry`] with the frame field always zero,
/// so flags and entries can be combined with a plain OR.
///
/// | Bit | Flag |
/// |-----|------|
/// | 0   | present |
/// | 1   | writable |
/// | 2   | user |
/// | 3   | write-through |
/// | 4   | no-cache |
/// | 5   | accessed |
/// | 6   | dirty |
/// | 7   | huge (PS) |
/// | 8   | global |
/// | 63  | no-execute |
#[bitfield(u64)]
#[derive(Eq, PartialEq, Hash)]
pub struct PageFlags {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub no_cache: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub huge: bool,
    pub global: bool,
    #[bits(54)]
    __: u64,
    pub no_execute: bool,
}

impl PageFlags {
    /// Flags given to intermediate tables created by a walk.
    pub const TABLE: Self = Self::new().with_present(true).with_writable(true);

    /// Kernel data: present, writable, not executable.
    pub const KERNEL_DATA: Self = Self::TABLE.with_no_execute(true);

    /// User data and stacks.
    pub const USER_DATA: Self = Self::KERNEL_DATA.with_user(true);

    /// User code: present, user, executable, read-only.
    pub const USER_CODE: Self = Self::new().with_present(true).with_user(true);

    /// Device memory: kernel only, uncached, not executable.
    pub const MMIO: Self = Self::KERNEL_DATA.with_no_cache(true).with_write_through(true);

    /// Bits widened into every intermediate entry above a leaf.
    pub const INHERITED: Self = Self::new().with_writable(true).with_user(true);

    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self::from_bits(self.into_bits() | other.into_bits())
    }

    #[inline]
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self::from_bits(self.into_bits() & other.into_bits())
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.into_bits() & other.into_bits() == other.into_bits()
    }
}

impl BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for PageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// One 64-bit entry of any paging level.
///
/// An entry is either zero (not present), a link to the next table, or a
/// leaf (any PT entry, or a PD/PDPT entry with the huge bit).
///
/// ```rust
/// # use kernel_vmem::{PageFlags, PageTableEntry};
/// # use kernel_memory_addresses::*;
/// let frame = PhysicalPage::<Size4K>::from_number(0x1234);
/// let e = PageTableEntry::leaf(frame, PageFlags::USER_DATA);
/// assert!(e.present() && e.user() && e.no_execute());
/// assert_eq!(e.address().as_u64(), 0x0123_4000);
/// assert!(PageTableEntry::ZERO.is_unused());
/// ```
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct PageTableEntry {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub no_cache: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub huge: bool,
    pub global: bool,
    #[bits(3)]
    pub os_low: u8,
    #[bits(40)]
    frame_number: u64,
    #[bits(11)]
    pub os_high: u16,
    pub no_execute: bool,
}

impl PageTableEntry {
    pub const ZERO: Self = Self::new();

    /// A present leaf for `frame`. `huge` is taken from `flags`.
    #[inline]
    #[must_use]
    pub const fn leaf<S: PageSize>(frame: PhysicalPage<S>, flags: PageFlags) -> Self {
        Self::from_bits(
            (frame.base().as_u64() & ADDRESS_MASK) | flags.with_present(true).into_bits(),
        )
    }

    /// A present link to the table in `table`.
    #[inline]
    #[must_use]
    pub const fn table<S: PageSize>(table: PhysicalPage<S>, flags: PageFlags) -> Self {
        Self::leaf(table, flags.with_huge(false))
    }

    /// Physical address held in bits 12..=51.
    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.into_bits() & ADDRESS_MASK)
    }

    /// The referenced 4 KiB frame (next table or 4 KiB leaf).
    #[inline]
    #[must_use]
    pub const fn frame<S: PageSize>(self) -> PhysicalPage<S> {
        PhysicalPage::containing_address(self.address())
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageFlags {
        PageFlags::from_bits(self.into_bits() & !ADDRESS_MASK)
    }

    /// ORs `flags` into this entry, keeping the frame.
    #[inline]
    #[must_use]
    pub const fn with_flags_added(self, flags: PageFlags) -> Self {
        Self::from_bits(self.into_bits() | (flags.into_bits() & !ADDRESS_MASK))
    }

    /// A not-present entry is all zero.
    #[inline]
    #[must_use]
    pub const fn is_unused(self) -> bool {
        self.into_bits() == 0
    }
}

impl fmt::Display for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.present() {
            return f.write_str("-");
        }
        write!(
            f,
            "{} {}{}{}{}{}",
            self.address(),
            if self.writable() { 'W' } else { 'r' },
            if self.user() { 'U' } else { 'k' },
            if self.huge() { 'H' } else { '-' },
            if self.global() { 'G' } else { '-' },
            if self.no_execute() { "NX" } else { "X" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::{Size2M, Size4K};

    #[test]
    fn bit_positions() {
        assert_eq!(PageFlags::new().with_present(true).into_bits(), 1 << 0);
        assert_eq!(PageFlags::new().with_writable(true).into_bits(), 1 << 1);
        assert_eq!(PageFlags::new().with_user(true).into_bits(), 1 << 2);
        assert_eq!(PageFlags::new().with_write_through(true).into_bits(), 1 << 3);
        assert_eq!(PageFlags::new().with_no_cache(true).into_bits(), 1 << 4);
        assert_eq!(PageFlags::new().with_accessed(true).into_bits(), 1 << 5);
        assert_eq!(PageFlags::new().with_dirty(true).into_bits(), 1 << 6);
        assert_eq!(PageFlags::new().with_huge(true).into_bits(), 1 << 7);
        assert_eq!(PageFlags::new().with_global(true).into_bits(), 1 << 8);
        assert_eq!(PageFlags::new().with_no_execute(true).into_bits(), 1 << 63);
    }

    #[test]
    fn leaf_keeps_frame_and_flags_apart() {
        let frame = PhysicalPage::<Size4K>::from_number(0xF_FFFF_FFFF);
        let e = PageTableEntry::leaf(frame, PageFlags::KERNEL_DATA);
        assert_eq!(e.frame::<Size4K>(), frame);
        assert_eq!(e.flags(), PageFlags::KERNEL_DATA);
    }

    #[test]
    fn huge_leaf() {
        let frame = PhysicalPage::<Size2M>::from_number(3);
        let e = PageTableEntry::leaf(frame, PageFlags::KERNEL_DATA.with_huge(true));
        assert!(e.huge());
        assert_eq!(e.address().as_u64(), 3 << 21);
    }

    #[test]
    fn or_flags_into_link() {
        let table = PhysicalPage::<Size4K>::from_number(7);
        let link = PageTableEntry::table(table, PageFlags::TABLE);
        assert!(!link.user());
        let widened = link.with_flags_added(PageFlags::INHERITED);
        assert!(widened.user() && widened.writable());
        assert_eq!(widened.frame::<Size4K>(), table);
    }

    #[test]
    fn flag_set_operations() {
        let f = PageFlags::USER_DATA;
        assert!(f.contains(PageFlags::KERNEL_DATA));
        assert!(!PageFlags::KERNEL_DATA.contains(f));
        assert_eq!(f.intersection(PageFlags::INHERITED), PageFlags::INHERITED);
        let mut g = PageFlags::new();
        g |= PageFlags::USER_CODE;
        assert_eq!(g | PageFlags::TABLE, PageFlags::USER_CODE.with_writable(true));
    }
}
