use crate::{PageSize, PhysicalAddress, VirtualAddress};
use core::fmt;
use core::marker::PhantomData;

macro_rules! page_type {
    ($(#[$doc:meta])* $name:ident, $addr:ident, $tag:literal) => {
        $(#[$doc])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name<S: PageSize> {
            base: u64,
            _size: PhantomData<S>,
        }

        impl<S: PageSize> $name<S> {
            /// Page containing `addr` (aligns down).
            #[inline]
            #[must_use]
            pub const fn containing_address(addr: $addr) -> Self {
                Self {
                    base: addr.as_u64() & !(S::SIZE - 1),
                    _size: PhantomData,
                }
            }

            /// Page starting exactly at `addr`, or `None` if `addr` is unaligned.
            #[inline]
            #[must_use]
            pub const fn from_start_address(addr: $addr) -> Option<Self> {
                if addr.as_u64() & (S::SIZE - 1) == 0 {
                    Some(Self::containing_address(addr))
                } else {
                    None
                }
            }

            /// Page with the given number (`base >> S::SHIFT`).
            #[inline]
            #[must_use]
            pub const fn from_number(number: u64) -> Self {
                Self {
                    base: number << S::SHIFT,
                    _size: PhantomData,
                }
            }

            #[inline]
            #[must_use]
            pub const fn base(self) -> $addr {
                $addr::new(self.base)
            }

            #[inline]
            #[must_use]
            pub const fn number(self) -> u64 {
                self.base >> S::SHIFT
            }

            /// The page `n` pages after this one.
            #[inline]
            #[must_use]
            pub const fn offset_by(self, n: u64) -> Self {
                Self::from_number(self.number() + n)
            }

            /// The full address at `offset` bytes into this page.
            #[inline]
            #[must_use]
            pub const fn join(self, offset: u64) -> $addr {
                debug_assert!(offset < S::SIZE);
                $addr::new(self.base | offset)
            }
        }

        impl<S: PageSize> fmt::Debug for $name<S> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "<{}>(0x{:016X})"), S::NAME, self.base)
            }
        }

        impl<S: PageSize> fmt::Display for $name<S> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:016X}/{}", self.base, S::NAME)
            }
        }
    };
}

page_type!(
    /// Page-aligned physical frame of size `S`.
    ///
    /// ```rust
    /// # use kernel_memory_addresses::*;
    /// let frame = PhysicalPage::<Size4K>::from_number(5);
    /// assert_eq!(frame.base().as_u64(), 5 * 4096);
    /// assert_eq!(frame.join(0x10).as_u64(), 5 * 4096 + 0x10);
    /// ```
    PhysicalPage, PhysicalAddress, "PhysicalPage"
);

page_type!(
    /// Page-aligned virtual page of size `S`.
    ///
    /// ```rust
    /// # use kernel_memory_addresses::*;
    /// let va = VirtualAddress::new(0x1234_5678);
    /// let page = VirtualPage::<Size4K>::containing_address(va);
    /// assert_eq!(page.base().as_u64(), 0x1234_5000);
    /// assert!(VirtualPage::<Size4K>::from_start_address(va).is_none());
    /// ```
    VirtualPage, VirtualAddress, "VirtualPage"
);
