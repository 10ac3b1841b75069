use crate::{PageSize, PageTableLevel, VirtualPage};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Virtual memory address.
///
/// A `VirtualAddress` is not checked for canonical form on construction:
/// the region allocator tracks the whole 64-bit space (including the
/// non-canonical hole) and marks the hole used. Use
/// [`is_canonical`](Self::is_canonical) where it matters.
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0x0000_7fff_ffff_f000);
/// assert!(va.is_lower_half());
/// assert_eq!(va.table_index(PageTableLevel::Pml4), 255);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    /// First address of the higher (kernel) half.
    pub const HIGHER_HALF: Self = Self(0xffff_8000_0000_0000);

    /// One past the last address of the lower (user) half.
    pub const LOWER_HALF_END: Self = Self(0x0000_8000_0000_0000);

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
        Self(ptr as u64)
    }

    /// Builds the canonical address selected by the four table indices.
    #[inline]
    #[must_use]
    pub const fn from_indices(pml4: u16, pdpt: u16, pd: u16, pt: u16) -> Self {
        let raw = ((pml4 as u64 & 0x1ff) << 39)
            | ((pdpt as u64 & 0x1ff) << 30)
            | ((pd as u64 & 0x1ff) << 21)
            | ((pt as u64 & 0x1ff) << 12);
        Self(sign_extend(raw))
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    #[inline]
    #[must_use]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// 9-bit table index this address selects at `level`.
    #[inline]
    #[must_use]
    pub const fn table_index(self, level: PageTableLevel) -> usize {
        ((self.0 >> level.shift()) & 0x1ff) as usize
    }

    /// Bits 63‒48 replicate bit 47.
    #[inline]
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        sign_extend(self.0) == self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_lower_half(self) -> bool {
        self.0 < Self::LOWER_HALF_END.0
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.0 & (S::SIZE - 1) == 0
    }

    #[inline]
    #[must_use]
    pub const fn align_down<S: PageSize>(self) -> Self {
        Self(self.0 & !(S::SIZE - 1))
    }

    #[inline]
    #[must_use]
    pub const fn page<S: PageSize>(self) -> VirtualPage<S> {
        VirtualPage::containing_address(self)
    }

    #[inline]
    #[must_use]
    pub const fn offset_in<S: PageSize>(self) -> u64 {
        self.0 & (S::SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

/// Sign-extends bit 47 into bits 63‒48.
#[inline(always)]
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
const fn sign_extend(v: u64) -> u64 {
    (((v << 16) as i64) >> 16) as u64
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl<S: PageSize> From<VirtualPage<S>> for VirtualAddress {
    #[inline]
    fn from(page: VirtualPage<S>) -> Self {
        page.base()
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub for VirtualAddress {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> u64 {
        self.0 - rhs.0
    }
}
