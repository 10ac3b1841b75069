use core::fmt;

/// One level of the x86-64 4-level paging hierarchy.
///
/// Each level consumes a 9-bit slice of the virtual address:
///
/// | Level | Bits | Leaf capable |
/// |-------|------|--------------|
/// | [`Pml4`](Self::Pml4) | 47‒39 | no |
/// | [`Pdpt`](Self::Pdpt) | 38‒30 | 1 GiB |
/// | [`Pd`](Self::Pd)     | 29‒21 | 2 MiB |
/// | [`Pt`](Self::Pt)     | 20‒12 | 4 KiB |
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PageTableLevel {
    Pml4,
    Pdpt,
    Pd,
    Pt,
}

impl PageTableLevel {
    /// Levels in walk order, root first.
    pub const WALK: [Self; 4] = [Self::Pml4, Self::Pdpt, Self::Pd, Self::Pt];

    /// Bit position of the lowest bit of this level's index slice.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Pml4 => 39,
            Self::Pdpt => 30,
            Self::Pd => 21,
            Self::Pt => 12,
        }
    }

    /// The level below this one, or `None` for [`Pt`](Self::Pt).
    #[inline]
    #[must_use]
    pub const fn next_lower(self) -> Option<Self> {
        match self {
            Self::Pml4 => Some(Self::Pdpt),
            Self::Pdpt => Some(Self::Pd),
            Self::Pd => Some(Self::Pt),
            Self::Pt => None,
        }
    }

    /// Bytes covered by a single entry at this level.
    #[inline]
    #[must_use]
    pub const fn entry_span(self) -> u64 {
        1 << self.shift()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pml4 => "pml4",
            Self::Pdpt => "pdpt",
            Self::Pd => "pd",
            Self::Pt => "pt",
        }
    }
}

impl fmt::Debug for PageTableLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PageTableLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
