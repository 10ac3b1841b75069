use kernel_memory_addresses::{PageTableLevel, VirtualAddress};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PageTableError {
    #[error("no frame available for a {0} table")]
    OutOfMemory(PageTableLevel),
    #[error("{0:?} is already mapped")]
    PageAlreadyMapped(VirtualAddress),
    #[error("{0:?} is not mapped")]
    PageAlreadyUnmapped(VirtualAddress),
    #[error("{address:?} is unmapped at the {level} level")]
    Unmapped {
        address: VirtualAddress,
        level: PageTableLevel,
    },
    #[error("{address:?} is covered by a huge page at the {level} level")]
    HugePageConflict {
        address: VirtualAddress,
        level: PageTableLevel,
    },
}
