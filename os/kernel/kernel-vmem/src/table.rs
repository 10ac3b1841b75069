use crate::entry::PageTableEntry;

/// Entries per table at every level.
pub const ENTRIES: usize = 512;

/// First PML4 index of the kernel (upper) half.
pub const KERNEL_HALF_FIRST_INDEX: usize = 256;

/// One 4 KiB paging structure.
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [PageTableEntry::ZERO; ENTRIES],
        }
    }

    /// Clears every entry.
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::ZERO);
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageTableEntry {
        self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, entry: PageTableEntry) {
        self.entries[index] = entry;
    }

    /// Clears `index` and returns the previous entry.
    #[inline]
    pub const fn take(&mut self, index: usize) -> PageTableEntry {
        let old = self.entries[index];
        self.entries[index] = PageTableEntry::ZERO;
        old
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.is_unused())
    }

    /// Present entries with their indices.
    pub fn present(&self) -> impl Iterator<Item = (usize, PageTableEntry)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.present())
    }
}
