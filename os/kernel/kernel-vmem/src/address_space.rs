//! # Address Space (x86-64, PML4-rooted)
//!
//! [`AddressSpace`] is a handle to one paging hierarchy: a PML4 frame plus the
//! [`PhysMapper`] used to reach table frames. All operations walk the tree
//! through the mapper; nothing here touches CR3 or the TLB.
//!
//! ## Walk rules
//!
//! - Missing intermediate tables are allocated from the caller's
//!   [`FrameAlloc`], zero-filled, and linked as `PRESENT | WRITABLE`.
//! - A user-accessible leaf widens `USER` (and `WRITABLE` if requested) into
//!   every intermediate entry above it. The CPU takes the most restrictive
//!   permission along the walk.
//! - Mapping over a present leaf fails with
//!   [`PageAlreadyMapped`](PageTableError::PageAlreadyMapped) and leaves the
//!   entry untouched.
//! - [`unmap`](AddressSpace::unmap) clears only the leaf. Emptied tables stay
//!   linked until [`free_user_tables`](AddressSpace::free_user_tables) tears
//!   down the whole lower half.
//!
//! ## Safety
//!
//! The mapper must yield writable references to table frames, and the
//! caller must hold the only live access to this hierarchy (interrupts
//! masked on a single core).

use crate::entry::{PageFlags, PageTableEntry};
use crate::table::{ENTRIES, KERNEL_HALF_FIRST_INDEX, PageTable};
use crate::{FrameAlloc, PageTableError, PhysMapper};
use kernel_memory_addresses::{
    PageTableLevel, PhysicalAddress, PhysicalPage, Size1G, Size2M, Size4K,
    VirtualAddress, VirtualPage,
};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>,
    mapper: &'m M,
}

impl<M: PhysMapper> Clone for AddressSpace<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: PhysMapper> Copy for AddressSpace<'_, M> {}

/// Link tables above a PT, root first, with the index taken in each.
type Path = [(PhysicalPage<Size4K>, usize); 3];

/// Where a walk for `map` should stop.
enum Leaf {
    Pt,
    Pd,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Wraps an existing PML4.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage<Size4K>) -> Self {
        Self { root, mapper }
    }

    /// Allocates and zeroes a fresh PML4.
    ///
    /// # Errors
    /// [`PageTableError::OutOfMemory`] if `frames` is exhausted.
    pub fn create<A: FrameAlloc + ?Sized>(
        mapper: &'m M,
        frames: &mut A,
    ) -> Result<Self, PageTableError> {
        let root = frames
            .alloc_4k()
            .ok_or(PageTableError::OutOfMemory(PageTableLevel::Pml4))?;
        let space = Self::from_root(mapper, root);
        space.table(root).zero();
        Ok(space)
    }

    /// Physical frame of the PML4; the value CR3 must hold.
    #[inline]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[inline]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn table(&self, frame: PhysicalPage<Size4K>) -> &'m mut PageTable {
        // SAFETY: every frame reached from `root` holds a page table, and the
        // caller serializes access to this hierarchy.
        unsafe { self.mapper.phys_to_mut::<PageTable>(frame.base()) }
    }

    /// Resolves `va` to the physical address it maps to, including the
    /// in-page offset. Honours 2 MiB and 1 GiB leaves.
    ///
    /// # Errors
    /// [`PageTableError::Unmapped`] with the first level that was not present.
    pub fn translate(&self, va: VirtualAddress) -> Result<PhysicalAddress, PageTableError> {
        let mut table = self.table(self.root);
        for level in [PageTableLevel::Pml4, PageTableLevel::Pdpt, PageTableLevel::Pd] {
            let entry = table.get(va.table_index(level));
            if !entry.present() {
                return Err(PageTableError::Unmapped { address: va, level });
            }
            match (level, entry.huge()) {
                (PageTableLevel::Pdpt, true) => {
                    return Ok(entry.address() + va.offset_in::<Size1G>());
                }
                (PageTableLevel::Pd, true) => {
                    return Ok(entry.address() + va.offset_in::<Size2M>());
                }
                _ => table = self.table(entry.frame()),
            }
        }

        let entry = table.get(va.table_index(PageTableLevel::Pt));
        if !entry.present() {
            return Err(PageTableError::Unmapped {
                address: va,
                level: PageTableLevel::Pt,
            });
        }
        Ok(entry.address() + va.offset_in::<Size4K>())
    }

    /// Maps one 4 KiB `page` to `frame`.
    ///
    /// `PRESENT` is implied; `HUGE` in `flags` is ignored.
    ///
    /// # Errors
    /// - [`PageTableError::OutOfMemory`] while creating an intermediate table.
    ///   Tables created before the failure stay linked.
    /// - [`PageTableError::PageAlreadyMapped`] if the leaf is present.
    /// - [`PageTableError::HugePageConflict`] if a huge leaf covers `page`.
    pub fn map<A: FrameAlloc + ?Sized>(
        &self,
        frames: &mut A,
        page: VirtualPage<Size4K>,
        frame: PhysicalPage<Size4K>,
        flags: PageFlags,
    ) -> Result<(), PageTableError> {
        let va = page.base();
        let (table, index) = self.walk_create(frames, va, flags, &Leaf::Pt)?;
        if table.get(index).present() {
            return Err(PageTableError::PageAlreadyMapped(va));
        }
        table.set(index, PageTableEntry::leaf(frame, flags.with_huge(false)));
        Ok(())
    }

    /// Maps one 2 MiB `page` to `frame` with a huge PD entry.
    ///
    /// # Errors
    /// As [`map`](Self::map). A PD entry that links a page table also counts
    /// as already mapped.
    pub fn map_2m<A: FrameAlloc + ?Sized>(
        &self,
        frames: &mut A,
        page: VirtualPage<Size2M>,
        frame: PhysicalPage<Size2M>,
        flags: PageFlags,
    ) -> Result<(), PageTableError> {
        let va = page.base();
        let (table, index) = self.walk_create(frames, va, flags, &Leaf::Pd)?;
        if table.get(index).present() {
            return Err(PageTableError::PageAlreadyMapped(va));
        }
        table.set(index, PageTableEntry::leaf(frame, flags.with_huge(true)));
        Ok(())
    }

    /// Walks down to the table holding the leaf for `va`, creating missing
    /// tables on the way.
    fn walk_create<A: FrameAlloc + ?Sized>(
        &self,
        frames: &mut A,
        va: VirtualAddress,
        flags: PageFlags,
        leaf: &Leaf,
    ) -> Result<(&'m mut PageTable, usize), PageTableError> {
        let widen = if flags.user() {
            flags.intersection(PageFlags::INHERITED)
        } else {
            PageFlags::new()
        };
        let links: &[PageTableLevel] = match leaf {
            Leaf::Pt => &PageTableLevel::WALK[..3],
            Leaf::Pd => &PageTableLevel::WALK[..2],
        };

        let mut table = self.table(self.root);
        for &level in links {
            let index = va.table_index(level);
            let entry = table.get(index);
            let next = if entry.present() {
                if entry.huge() {
                    return Err(PageTableError::HugePageConflict { address: va, level });
                }
                table.set(index, entry.with_flags_added(widen));
                entry.frame()
            } else {
                let lower = level.next_lower().unwrap_or(level);
                let frame = frames
                    .alloc_4k()
                    .ok_or(PageTableError::OutOfMemory(lower))?;
                self.table(frame).zero();
                table.set(index, PageTableEntry::table(frame, PageFlags::TABLE.union(widen)));
                frame
            };
            table = self.table(next);
        }

        let leaf_level = match leaf {
            Leaf::Pt => PageTableLevel::Pt,
            Leaf::Pd => PageTableLevel::Pd,
        };
        Ok((table, va.table_index(leaf_level)))
    }

    /// Walks to the PT for a 4 KiB `va` without creating anything.
    ///
    /// Returns the PT plus the `(table, index)` pairs of the three links
    /// above it, root first.
    fn walk_existing(&self, va: VirtualAddress) -> Result<(&'m mut PageTable, Path), PageTableError> {
        let mut path: Path = [(self.root, 0); 3];
        let mut frame = self.root;
        for (slot, &level) in path.iter_mut().zip(&PageTableLevel::WALK[..3]) {
            let index = va.table_index(level);
            let entry = self.table(frame).get(index);
            if !entry.present() {
                return Err(PageTableError::PageAlreadyUnmapped(va));
            }
            if entry.huge() {
                return Err(PageTableError::HugePageConflict { address: va, level });
            }
            *slot = (frame, index);
            frame = entry.frame();
        }
        Ok((self.table(frame), path))
    }

    /// Clears the 4 KiB leaf for `page` and returns the frame it mapped.
    ///
    /// Intermediate tables are kept. The caller flushes the TLB.
    ///
    /// # Errors
    /// - [`PageTableError::PageAlreadyUnmapped`] if any level is absent.
    /// - [`PageTableError::HugePageConflict`] if a huge leaf covers `page`.
    pub fn unmap(&self, page: VirtualPage<Size4K>) -> Result<PhysicalPage<Size4K>, PageTableError> {
        let va = page.base();
        let (pt, _) = self.walk_existing(va)?;
        let index = va.table_index(PageTableLevel::Pt);
        if !pt.get(index).present() {
            return Err(PageTableError::PageAlreadyUnmapped(va));
        }
        Ok(pt.take(index).frame())
    }

    /// Points an existing 4 KiB mapping at `frame` with `flags`.
    ///
    /// Every intermediate entry on the path is widened by the `WRITABLE` and
    /// `USER` bits of `flags`. The caller flushes the TLB.
    ///
    /// # Errors
    /// - [`PageTableError::PageAlreadyUnmapped`] if the page is not mapped.
    /// - [`PageTableError::HugePageConflict`] if a huge leaf covers `page`.
    pub fn remap(
        &self,
        page: VirtualPage<Size4K>,
        frame: PhysicalPage<Size4K>,
        flags: PageFlags,
    ) -> Result<(), PageTableError> {
        let va = page.base();
        let (pt, path) = self.walk_existing(va)?;
        let index = va.table_index(PageTableLevel::Pt);
        if !pt.get(index).present() {
            return Err(PageTableError::PageAlreadyUnmapped(va));
        }
        let widen = flags.intersection(PageFlags::INHERITED);
        for (frame, i) in path {
            let table = self.table(frame);
            table.set(i, table.get(i).with_flags_added(widen));
        }
        pt.set(index, PageTableEntry::leaf(frame, flags.with_huge(false)));
        Ok(())
    }

    /// Makes sure the PML4 slot `index` links a PDPT, creating an empty one
    /// if needed. Used to pre-create the shared kernel slots so that later
    /// kernel mappings are visible in every address space that copied them.
    ///
    /// # Errors
    /// [`PageTableError::OutOfMemory`] if a PDPT is needed and none is left.
    pub fn ensure_pml4_slot<A: FrameAlloc + ?Sized>(
        &self,
        frames: &mut A,
        index: usize,
    ) -> Result<PhysicalPage<Size4K>, PageTableError> {
        let pml4 = self.table(self.root);
        let entry = pml4.get(index);
        if entry.present() {
            return Ok(entry.frame());
        }
        let frame = frames
            .alloc_4k()
            .ok_or(PageTableError::OutOfMemory(PageTableLevel::Pdpt))?;
        self.table(frame).zero();
        pml4.set(index, PageTableEntry::table(frame, PageFlags::TABLE));
        Ok(frame)
    }

    /// Copies PML4 entries `256..512` from `kernel` with `USER` cleared, so
    /// the kernel stays mapped but unreachable from ring 3.
    pub fn copy_kernel_half(&self, kernel: &Self) {
        let src = kernel.table(kernel.root);
        let dst = self.table(self.root);
        for index in KERNEL_HALF_FIRST_INDEX..ENTRIES {
            let entry = src.get(index);
            dst.set(index, entry.with_user(false));
        }
    }

    /// Unlinks every lower-half table and hands its frame to `release`.
    ///
    /// Leaf frames are not released; unmap them first. Upper-half (shared)
    /// entries are never touched. Returns the number of tables released.
    pub fn free_user_tables(&self, mut release: impl FnMut(PhysicalPage<Size4K>)) -> usize {
        let pml4 = self.table(self.root);
        let mut released = 0;
        for index in 0..KERNEL_HALF_FIRST_INDEX {
            let entry = pml4.take(index);
            if entry.present() {
                released += self.release_subtree(entry.frame(), PageTableLevel::Pdpt, &mut release);
            }
        }
        released
    }

    fn release_subtree(
        &self,
        frame: PhysicalPage<Size4K>,
        level: PageTableLevel,
        release: &mut impl FnMut(PhysicalPage<Size4K>),
    ) -> usize {
        let mut released = 0;
        if let Some(lower) = level.next_lower() {
            let table = self.table(frame);
            for (_, entry) in table.present() {
                if !entry.huge() {
                    released += self.release_subtree(entry.frame(), lower, release);
                }
            }
        }
        release(frame);
        released + 1
    }

    /// Number of present entries in the PML4.
    #[must_use]
    pub fn pml4_slots_in_use(&self) -> usize {
        self.table(self.root).present().count()
    }

    /// Raw PML4 entry at `index`.
    #[must_use]
    pub fn pml4_entry(&self, index: usize) -> PageTableEntry {
        self.table(self.root).get(index)
    }

    /// The leaf entry for a 4 KiB page, if its tables exist.
    #[must_use]
    pub fn leaf_entry(&self, page: VirtualPage<Size4K>) -> Option<PageTableEntry> {
        let va = page.base();
        let (pt, _) = self.walk_existing(va).ok()?;
        Some(pt.get(va.table_index(PageTableLevel::Pt)))
    }
}
