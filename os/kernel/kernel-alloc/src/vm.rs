//! # Virtual Memory Region Allocator
//!
//! Every address space owns one [`VirtualMemoryAllocator`]: a list of the
//! virtual ranges that are still unused, plus the PML4 it maps into.
//!
//! ```text
//!  head
//!   │
//!   ▼
//! ┌────────────────┐    ┌────────────────┐    ┌────────────────┐
//! │ [b0, e0)       │◄──►│ [b1, e1)       │◄──►│ [b2, e2)       │──► NIL
//! └────────────────┘    └────────────────┘    └────────────────┘
//!   slot 7                slot 0                slot 3
//! ```
//!
//! Nodes live in a fixed pool of [`RegionSlot`]s (never the general heap)
//! and link to each other by slot index. Unused slots form a second,
//! singly linked stack through `next`.
//!
//! ## Rules
//!
//! - Regions are page aligned, `begin` inclusive and `end` exclusive.
//! - Free regions never overlap. Free plus used covers
//!   `[0x1000, 0xffff_ffff_ffff_f000)`.
//! - [`mark_used`](RegionList::mark_used) must find a single free region
//!   that contains the whole range.
//! - [`mark_unused`](RegionList::mark_unused) prepends a node and does not
//!   merge it with neighbouring free regions.
//! - Backed and MMIO allocation pick a random fitting region and a random
//!   page offset inside its slack (ASLR). With ASLR off, the lowest fitting
//!   address wins.
//! - A failure halfway through mapping leaves the frames and mappings made
//!   so far in place.

use crate::frame_alloc::{BitmapFrameAllocator, FrameAllocError};
use crate::random::{ChaCha20Rng, RandomSource};
use kernel_info::memory::{
    FIRST_USABLE_ADDRESS, KERNEL_HALF_START, LAST_TRACKED_ADDRESS, USER_SPACE_END,
};
use kernel_memory_addresses::{
    PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, VirtualPage, align_down, align_up,
};
use kernel_vmem::{AddressSpace, ENTRIES, PageFlags, PageTableError, PhysMapper, Tlb};
use log::{debug, warn};

const PAGE: u64 = 4096;
const NIL: u32 = u32::MAX;

/// Bytes covered by one PML4 entry.
const PML4_SPAN: u64 = 0x80_0000_0000;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("address or size is not page aligned")]
    InvalidPageAlignment,
    #[error("empty or inverted range")]
    InvalidRange,
    #[error("no single free region contains the range")]
    NotFound,
    #[error("the region pool is exhausted")]
    NotEnoughMemoryPages,
    #[error("no free region is large enough")]
    OutOfMemory,
    #[error(transparent)]
    Frame(#[from] FrameAllocError),
    #[error(transparent)]
    PageTable(#[from] PageTableError),
}

/// One node of the free-region list. Any bit pattern is a valid slot, so a
/// pool can be laid over raw frames.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RegionSlot {
    begin: u64,
    end: u64,
    prev: u32,
    next: u32,
}

impl RegionSlot {
    pub const EMPTY: Self = Self {
        begin: 0,
        end: 0,
        prev: NIL,
        next: NIL,
    };

    const fn len(&self) -> u64 {
        self.end - self.begin
    }
}

const fn check_aligned(va: VirtualAddress) -> Result<u64, VmError> {
    if va.is_aligned::<Size4K>() {
        Ok(va.as_u64())
    } else {
        Err(VmError::InvalidPageAlignment)
    }
}

/// Page count for `size`, which must be a non-zero multiple of 4 KiB.
const fn check_size(size: u64) -> Result<u64, VmError> {
    if size == 0 {
        Err(VmError::InvalidRange)
    } else if size % PAGE != 0 {
        Err(VmError::InvalidPageAlignment)
    } else {
        Ok(size / PAGE)
    }
}

/// The free list itself, without any notion of page tables.
pub struct RegionList<'p> {
    slots: &'p mut [RegionSlot],
    head: u32,
    spare: u32,
    len: usize,
}

impl<'p> RegionList<'p> {
    /// Lays the list over `slots` and seeds it with the whole tracked range.
    ///
    /// # Errors
    /// [`VmError::NotEnoughMemoryPages`] if `slots` is empty.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(slots: &'p mut [RegionSlot]) -> Result<Self, VmError> {
        let capacity = slots.len().min(NIL as usize);
        let slots = &mut slots[..capacity];
        for (i, slot) in slots.iter_mut().enumerate() {
            let next = if i + 1 < capacity { i as u32 + 1 } else { NIL };
            *slot = RegionSlot { next, ..RegionSlot::EMPTY };
        }

        let mut list = Self {
            slots,
            head: NIL,
            spare: if capacity == 0 { NIL } else { 0 },
            len: 0,
        };
        list.push_front(FIRST_USABLE_ADDRESS, LAST_TRACKED_ADDRESS)?;
        Ok(list)
    }

    fn push_front(&mut self, begin: u64, end: u64) -> Result<(), VmError> {
        if self.spare == NIL {
            return Err(VmError::NotEnoughMemoryPages);
        }
        let index = self.spare;
        self.spare = self.slots[index as usize].next;

        self.slots[index as usize] = RegionSlot {
            begin,
            end,
            prev: NIL,
            next: self.head,
        };
        if self.head != NIL {
            self.slots[self.head as usize].prev = index;
        }
        self.head = index;
        self.len += 1;
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn unlink(&mut self, index: usize) {
        let RegionSlot { prev, next, .. } = self.slots[index];
        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev as usize].next = next;
        }
        if next != NIL {
            self.slots[next as usize].prev = prev;
        }

        self.slots[index] = RegionSlot {
            next: self.spare,
            ..RegionSlot::EMPTY
        };
        self.spare = index as u32;
        self.len -= 1;
    }

    /// Slot indices in list order.
    fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            if cursor == NIL {
                return None;
            }
            let index = cursor as usize;
            cursor = self.slots[index].next;
            Some(index)
        })
    }

    /// Free regions in list order, as `[begin, end)`.
    pub fn regions(&self) -> impl Iterator<Item = (VirtualAddress, VirtualAddress)> + '_ {
        self.indices().map(|i| {
            let slot = &self.slots[i];
            (VirtualAddress::new(slot.begin), VirtualAddress::new(slot.end))
        })
    }

    fn containing(&self, begin: u64, end: u64) -> Option<usize> {
        self.indices()
            .find(|&i| begin >= self.slots[i].begin && end <= self.slots[i].end)
    }

    /// Removes `[begin, end)` from the free list.
    ///
    /// An empty range is a no-op. On error nothing changes.
    ///
    /// # Errors
    /// - [`VmError::InvalidPageAlignment`] for unaligned bounds.
    /// - [`VmError::NotFound`] unless one free region contains the range.
    /// - [`VmError::NotEnoughMemoryPages`] if splitting needs a slot and the
    ///   pool is full.
    pub fn mark_used(&mut self, begin: VirtualAddress, end: VirtualAddress) -> Result<(), VmError> {
        let (begin, end) = (check_aligned(begin)?, check_aligned(end)?);
        if begin == end {
            return Ok(());
        }
        if begin > end {
            return Err(VmError::NotFound);
        }

        let index = self.containing(begin, end).ok_or(VmError::NotFound)?;
        let region = self.slots[index];
        match (begin > region.begin, end < region.end) {
            (true, true) => {
                self.push_front(end, region.end)?;
                self.slots[index].end = begin;
            }
            (true, false) => self.slots[index].end = begin,
            (false, true) => self.slots[index].begin = end,
            (false, false) => self.unlink(index),
        }
        Ok(())
    }

    /// Returns `[begin, end)` to the free list as a new node.
    ///
    /// The range is not checked against existing free regions.
    ///
    /// # Errors
    /// - [`VmError::InvalidPageAlignment`] for unaligned bounds.
    /// - [`VmError::InvalidRange`] if `begin > end`.
    /// - [`VmError::NotEnoughMemoryPages`] if the pool is full.
    pub fn mark_unused(
        &mut self,
        begin: VirtualAddress,
        end: VirtualAddress,
    ) -> Result<(), VmError> {
        let (begin, end) = (check_aligned(begin)?, check_aligned(end)?);
        match begin.cmp(&end) {
            core::cmp::Ordering::Equal => Ok(()),
            core::cmp::Ordering::Greater => Err(VmError::InvalidRange),
            core::cmp::Ordering::Less => self.push_front(begin, end),
        }
    }

    /// Picks the start of a free `size`-byte range.
    ///
    /// With a random source: a uniformly chosen region among those large
    /// enough, then a uniformly chosen page offset within its slack.
    /// Without one: the lowest fitting address.
    ///
    /// # Errors
    /// [`VmError::OutOfMemory`] if no free region can hold `size` bytes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn find_free(
        &self,
        size: u64,
        rng: Option<&mut dyn RandomSource>,
    ) -> Result<VirtualAddress, VmError> {
        check_size(size)?;
        let fitting = move || {
            self.indices()
                .map(move |i| self.slots[i])
                .filter(move |slot| slot.len() >= size)
        };

        let Some(rng) = rng else {
            return fitting()
                .map(|slot| slot.begin)
                .min()
                .map(VirtualAddress::new)
                .ok_or(VmError::OutOfMemory);
        };

        let count = fitting().count() as u64;
        if count == 0 {
            warn!(
                "No unused virtual region can hold {size:#x} bytes ({} regions, {:#x} bytes free)",
                self.len,
                self.free_bytes()
            );
            return Err(VmError::OutOfMemory);
        }

        let pick = rng.next_u64() % count;
        let slot = fitting()
            .nth(pick as usize)
            .ok_or(VmError::OutOfMemory)?;
        let slack_pages = (slot.len() - size) / PAGE + 1;
        let offset = if slack_pages > 1 {
            rng.next_u64() % slack_pages
        } else {
            0
        };
        Ok(VirtualAddress::new(slot.begin + offset * PAGE))
    }

    /// Whether a single free region contains `[begin, end)`.
    #[must_use]
    pub fn is_free(&self, begin: VirtualAddress, end: VirtualAddress) -> bool {
        begin < end && self.containing(begin.as_u64(), end.as_u64()).is_some()
    }

    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.indices().map(|i| self.slots[i].len()).sum()
    }

    #[must_use]
    pub const fn region_count(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Everything the region allocator needs from the rest of the kernel to turn
/// a virtual range into mapped memory.
pub struct VmContext<'k, M: PhysMapper> {
    pub frames: BitmapFrameAllocator<'k>,
    pub mapper: &'k M,
    pub tlb: &'k dyn Tlb,
    pub rng: ChaCha20Rng,
    /// Randomize placement. Off with the `NoASLR` kernel parameter.
    pub aslr: bool,
}

impl<'k, M: PhysMapper> VmContext<'k, M> {
    pub fn new(
        frames: BitmapFrameAllocator<'k>,
        mapper: &'k M,
        tlb: &'k dyn Tlb,
        rng: ChaCha20Rng,
        aslr: bool,
    ) -> Self {
        Self {
            frames,
            mapper,
            tlb,
            rng,
            aslr,
        }
    }

    /// The address space rooted at `root`.
    pub const fn space(&self, root: PhysicalPage<Size4K>) -> AddressSpace<'k, M> {
        AddressSpace::from_root(self.mapper, root)
    }

    fn placement(&mut self) -> Option<&mut dyn RandomSource> {
        if self.aslr {
            Some(&mut self.rng)
        } else {
            None
        }
    }
}

/// Free-region list of one address space, bound to its PML4.
pub struct VirtualMemoryAllocator<'p> {
    regions: RegionList<'p>,
    root: PhysicalPage<Size4K>,
    /// Frames backing `regions`, if they came from the frame allocator.
    pool: Option<(PhysicalPage<Size4K>, u64)>,
}

impl<'p> VirtualMemoryAllocator<'p> {
    /// Uses caller-provided slots for the region list.
    ///
    /// # Errors
    /// [`VmError::NotEnoughMemoryPages`] if `slots` is empty.
    pub fn with_slots(
        slots: &'p mut [RegionSlot],
        root: PhysicalPage<Size4K>,
    ) -> Result<Self, VmError> {
        Ok(Self {
            regions: RegionList::new(slots)?,
            root,
            pool: None,
        })
    }

    /// Allocates `pool_frames` contiguous frames for the region list.
    ///
    /// # Errors
    /// [`VmError::Frame`] if the frames are not available.
    #[allow(unsafe_code, clippy::cast_possible_truncation)]
    pub fn new_in<M: PhysMapper>(
        ctx: &mut VmContext<'p, M>,
        root: PhysicalPage<Size4K>,
        pool_frames: u64,
    ) -> Result<Self, VmError> {
        let first = ctx.frames.allocate_contiguous(pool_frames)?;
        let len = (pool_frames * PAGE) as usize / size_of::<RegionSlot>();
        // SAFETY: the frames were just allocated and are reached through
        // the mapper; every bit pattern is a valid `RegionSlot`.
        let slots = unsafe { ctx.mapper.phys_to_slice_mut::<RegionSlot>(first.base(), len) };
        let mut vm = Self::with_slots(slots, root)?;
        vm.pool = Some((first, pool_frames));
        Ok(vm)
    }

    /// The kernel's allocator.
    ///
    /// Everything below the top `top_entries` PML4 slots is marked used and
    /// those slots are linked to (possibly empty) PDPTs, so any later kernel
    /// mapping is shared by every address space that copied the kernel half.
    /// Then each `committed` range (kernel image, direct map, framebuffer)
    /// is marked used after clipping it to the kernel window.
    ///
    /// # Errors
    /// - [`VmError::InvalidRange`] unless `1 <= top_entries <= 256`.
    /// - [`VmError::NotFound`] if committed ranges overlap.
    /// - Frame and page-table errors while creating the pool or PDPTs.
    pub fn init_kernel<M: PhysMapper>(
        ctx: &mut VmContext<'p, M>,
        root: PhysicalPage<Size4K>,
        pool_frames: u64,
        top_entries: usize,
        committed: &[(VirtualAddress, VirtualAddress)],
    ) -> Result<Self, VmError> {
        if top_entries == 0 || top_entries > ENTRIES / 2 {
            return Err(VmError::InvalidRange);
        }
        let window = KERNEL_HALF_START + PML4_SPAN * (ENTRIES / 2 - top_entries) as u64;

        let mut vm = Self::new_in(ctx, root, pool_frames)?;
        vm.regions.mark_used(
            VirtualAddress::new(FIRST_USABLE_ADDRESS),
            VirtualAddress::new(window),
        )?;

        let space = ctx.space(root);
        for index in ENTRIES - top_entries..ENTRIES {
            space.ensure_pml4_slot(&mut ctx.frames, index)?;
        }

        for &(begin, end) in committed {
            let begin = align_down(begin.as_u64(), PAGE).max(window);
            let end = align_up(end.as_u64(), PAGE)
                .unwrap_or(LAST_TRACKED_ADDRESS)
                .min(LAST_TRACKED_ADDRESS);
            if begin >= end {
                continue;
            }
            debug!("Kernel range {begin:#x}..{end:#x} is committed");
            vm.regions
                .mark_used(VirtualAddress::new(begin), VirtualAddress::new(end))?;
        }

        Ok(vm)
    }

    /// A process allocator: only the lower half is available.
    ///
    /// # Errors
    /// Frame errors while creating the pool.
    pub fn init_process<M: PhysMapper>(
        ctx: &mut VmContext<'p, M>,
        root: PhysicalPage<Size4K>,
        pool_frames: u64,
    ) -> Result<Self, VmError> {
        let mut vm = Self::new_in(ctx, root, pool_frames)?;
        vm.regions.mark_used(
            VirtualAddress::new(USER_SPACE_END),
            VirtualAddress::new(LAST_TRACKED_ADDRESS),
        )?;
        Ok(vm)
    }

    /// Hands the pool frames back. Mappings are not touched.
    ///
    /// # Errors
    /// [`VmError::Frame`] if the pool frames were already freed.
    pub fn release<M: PhysMapper>(self, ctx: &mut VmContext<'_, M>) -> Result<(), VmError> {
        if let Some((first, count)) = self.pool {
            ctx.frames.deallocate_contiguous(first, count)?;
        }
        Ok(())
    }

    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[must_use]
    pub const fn regions(&self) -> &RegionList<'p> {
        &self.regions
    }

    /// See [`RegionList::mark_used`].
    ///
    /// # Errors
    /// As [`RegionList::mark_used`].
    pub fn mark_used(&mut self, begin: VirtualAddress, end: VirtualAddress) -> Result<(), VmError> {
        self.regions.mark_used(begin, end)
    }

    /// See [`RegionList::mark_unused`].
    ///
    /// # Errors
    /// As [`RegionList::mark_unused`].
    pub fn mark_unused(
        &mut self,
        begin: VirtualAddress,
        end: VirtualAddress,
    ) -> Result<(), VmError> {
        self.regions.mark_unused(begin, end)
    }

    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.regions.free_bytes()
    }

    #[must_use]
    pub const fn region_count(&self) -> usize {
        self.regions.region_count()
    }

    /// Allocates and maps `size` bytes of fresh, zeroed memory at a chosen
    /// address.
    ///
    /// # Errors
    /// - [`VmError::InvalidPageAlignment`] / [`VmError::InvalidRange`] for a
    ///   bad `size`.
    /// - [`VmError::OutOfMemory`] if no free region fits.
    /// - Frame and page-table errors while backing the range.
    pub fn allocate_backed<M: PhysMapper>(
        &mut self,
        ctx: &mut VmContext<'_, M>,
        size: u64,
        flags: PageFlags,
    ) -> Result<VirtualAddress, VmError> {
        let pages = check_size(size)?;
        let begin = self.regions.find_free(size, ctx.placement())?;
        self.back(ctx, begin, pages, flags)?;
        self.regions.mark_used(begin, VirtualAddress::new(begin.as_u64() + size))?;
        Ok(begin)
    }

    /// Like [`allocate_backed`](Self::allocate_backed) at the fixed address
    /// `begin`.
    ///
    /// # Errors
    /// [`VmError::NotFound`] if `[begin, begin + size)` is not free; else as
    /// [`allocate_backed`](Self::allocate_backed).
    pub fn allocate_backed_at<M: PhysMapper>(
        &mut self,
        ctx: &mut VmContext<'_, M>,
        begin: VirtualAddress,
        size: u64,
        flags: PageFlags,
    ) -> Result<(), VmError> {
        let pages = check_size(size)?;
        let start = check_aligned(begin)?;
        let end = start.checked_add(size).ok_or(VmError::InvalidRange)?;
        self.regions.mark_used(begin, VirtualAddress::new(end))?;
        self.back(ctx, begin, pages, flags)
    }

    #[allow(unsafe_code)]
    fn back<M: PhysMapper>(
        &self,
        ctx: &mut VmContext<'_, M>,
        begin: VirtualAddress,
        pages: u64,
        flags: PageFlags,
    ) -> Result<(), VmError> {
        let space = ctx.space(self.root);
        let first = begin.page::<Size4K>();
        for i in 0..pages {
            let frame = ctx.frames.allocate()?;
            // SAFETY: the frame was just allocated and nothing else refers to it.
            unsafe { ctx.mapper.phys_to_mut::<[u8; PAGE as usize]>(frame.base()) }.fill(0);
            space.map(&mut ctx.frames, first.offset_by(i), frame, flags)?;
        }
        Ok(())
    }

    /// Unmaps `size` bytes at `begin`, frees their frames and returns the
    /// range to the free list.
    ///
    /// # Errors
    /// - Alignment errors for `begin` or `size`.
    /// - [`VmError::PageTable`] if a page in the range is not mapped.
    /// - [`VmError::Frame`] if a frame was already freed.
    pub fn deallocate_backed<M: PhysMapper>(
        &mut self,
        ctx: &mut VmContext<'_, M>,
        begin: VirtualAddress,
        size: u64,
    ) -> Result<(), VmError> {
        let pages = check_size(size)?;
        check_aligned(begin)?;
        let space = ctx.space(self.root);
        let first = begin.page::<Size4K>();
        for i in 0..pages {
            let page = first.offset_by(i);
            let frame = space.unmap(page)?;
            ctx.frames.deallocate(frame)?;
            ctx.tlb.flush_page(page.base());
        }
        self.regions
            .mark_unused(begin, VirtualAddress::new(begin.as_u64() + size))
    }

    /// Maps the device range `[phys, phys + size)` at a chosen address.
    /// No frames are allocated.
    ///
    /// # Errors
    /// As [`allocate_backed`](Self::allocate_backed), plus
    /// [`VmError::InvalidPageAlignment`] for an unaligned `phys`.
    pub fn allocate_mmio<M: PhysMapper>(
        &mut self,
        ctx: &mut VmContext<'_, M>,
        phys: PhysicalAddress,
        size: u64,
        flags: PageFlags,
    ) -> Result<VirtualAddress, VmError> {
        if !phys.is_aligned::<Size4K>() {
            return Err(VmError::InvalidPageAlignment);
        }
        let pages = check_size(size)?;
        let begin = self.regions.find_free(size, ctx.placement())?;

        let space = ctx.space(self.root);
        let page = begin.page::<Size4K>();
        let frame = phys.page::<Size4K>();
        for i in 0..pages {
            space.map(&mut ctx.frames, page.offset_by(i), frame.offset_by(i), flags)?;
        }

        self.regions.mark_used(begin, VirtualAddress::new(begin.as_u64() + size))?;
        Ok(begin)
    }

    /// Unmaps an MMIO window. The device frames are not freed.
    ///
    /// # Errors
    /// As [`deallocate_backed`](Self::deallocate_backed), minus frame errors.
    pub fn deallocate_mmio<M: PhysMapper>(
        &mut self,
        ctx: &mut VmContext<'_, M>,
        begin: VirtualAddress,
        size: u64,
    ) -> Result<(), VmError> {
        let pages = check_size(size)?;
        check_aligned(begin)?;
        let space = ctx.space(self.root);
        let first: VirtualPage<Size4K> = begin.page();
        for i in 0..pages {
            let page = first.offset_by(i);
            space.unmap(page)?;
            ctx.tlb.flush_page(page.base());
        }
        self.regions
            .mark_unused(begin, VirtualAddress::new(begin.as_u64() + size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn va(v: u64) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    const TRACKED: u64 = LAST_TRACKED_ADDRESS - FIRST_USABLE_ADDRESS;

    #[test]
    fn starts_with_one_region() {
        let mut slots = [RegionSlot::EMPTY; 4];
        let list = RegionList::new(&mut slots).unwrap();
        assert_eq!(list.region_count(), 1);
        assert_eq!(list.free_bytes(), TRACKED);
        assert!(RegionList::new(&mut []).is_err());
    }

    #[test]
    fn used_then_unused_restores_free_bytes() {
        let mut slots = [RegionSlot::EMPTY; 8];
        let mut list = RegionList::new(&mut slots).unwrap();

        list.mark_used(va(0x10_0000), va(0x20_0000)).unwrap();
        assert_eq!(list.region_count(), 2);
        assert_eq!(list.free_bytes(), TRACKED - 0x10_0000);
        assert!(!list.is_free(va(0x10_0000), va(0x10_1000)));

        list.mark_unused(va(0x10_0000), va(0x20_0000)).unwrap();
        assert_eq!(list.free_bytes(), TRACKED);
        // No coalescing: three nodes describe the same space.
        assert_eq!(list.region_count(), 3);
    }

    #[test]
    fn edges_do_not_split() {
        let mut slots = [RegionSlot::EMPTY; 2];
        let mut list = RegionList::new(&mut slots).unwrap();
        list.mark_used(va(FIRST_USABLE_ADDRESS), va(0x5000)).unwrap();
        list.mark_used(va(0xffff_ffff_fff0_0000), va(LAST_TRACKED_ADDRESS)).unwrap();
        assert_eq!(list.region_count(), 1);
        let (begin, end) = list.regions().next().unwrap();
        assert_eq!((begin, end), (va(0x5000), va(0xffff_ffff_fff0_0000)));
    }

    #[test]
    fn range_must_be_inside_one_free_region() {
        let mut slots = [RegionSlot::EMPTY; 4];
        let mut list = RegionList::new(&mut slots).unwrap();
        list.mark_used(va(0x4000), va(0x6000)).unwrap();

        assert_eq!(list.mark_used(va(0x3000), va(0x5000)), Err(VmError::NotFound));
        assert_eq!(list.mark_used(va(0x0), va(0x1000)), Err(VmError::NotFound));
        assert_eq!(list.mark_used(va(0x3001), va(0x4000)), Err(VmError::InvalidPageAlignment));
        assert_eq!(list.mark_used(va(0x3000), va(0x3000)), Ok(()));
        assert_eq!(list.mark_unused(va(0x9000), va(0x8000)), Err(VmError::InvalidRange));
    }

    #[test]
    fn pool_exhaustion_leaves_list_unchanged() {
        let mut slots = [RegionSlot::EMPTY; 1];
        let mut list = RegionList::new(&mut slots).unwrap();
        assert_eq!(
            list.mark_used(va(0x10_0000), va(0x20_0000)),
            Err(VmError::NotEnoughMemoryPages)
        );
        assert_eq!(list.free_bytes(), TRACKED);

        // Trimming an edge needs no new slot.
        list.mark_used(va(0x1000), va(0x2000)).unwrap();
        assert_eq!(list.mark_unused(va(0x1000), va(0x2000)), Err(VmError::NotEnoughMemoryPages));
    }

    #[test]
    fn slots_are_recycled() {
        let mut slots = [RegionSlot::EMPTY; 2];
        let mut list = RegionList::new(&mut slots).unwrap();
        for _ in 0..10 {
            list.mark_used(va(0x10_0000), va(0x20_0000)).unwrap();
            assert_eq!(list.region_count(), 2);
            list.mark_used(va(0x1000), va(0x10_0000)).unwrap();
            list.mark_unused(va(0x1000), va(0x20_0000)).unwrap();
            assert_eq!(list.region_count(), 2);
            list.mark_used(va(0x1000), va(0x20_0000)).unwrap();
            list.mark_used(va(0x20_0000), va(LAST_TRACKED_ADDRESS)).unwrap();
            assert_eq!(list.region_count(), 0);
            list.mark_unused(va(FIRST_USABLE_ADDRESS), va(LAST_TRACKED_ADDRESS)).unwrap();
        }
        assert_eq!(list.free_bytes(), TRACKED);
    }

    #[test]
    fn lowest_fit_without_randomness() {
        let mut slots = [RegionSlot::EMPTY; 4];
        let mut list = RegionList::new(&mut slots).unwrap();
        list.mark_used(va(0x3000), va(0x10_0000)).unwrap();

        assert_eq!(list.find_free(0x2000, None), Ok(va(0x1000)));
        assert_eq!(list.find_free(0x3000, None), Ok(va(0x10_0000)));
        assert_eq!(list.find_free(0x1800, None), Err(VmError::InvalidPageAlignment));
        assert_eq!(list.find_free(0, None), Err(VmError::InvalidRange));
    }

    #[test]
    fn random_fit_stays_inside_a_region() {
        let mut slots = [RegionSlot::EMPTY; 4];
        let mut list = RegionList::new(&mut slots).unwrap();
        // Leave two small holes: [0x1000, 0x4000) and [0x8000, 0x9000).
        list.mark_used(va(0x4000), va(0x8000)).unwrap();
        list.mark_used(va(0x9000), va(LAST_TRACKED_ADDRESS)).unwrap();

        let mut rng = ChaCha20Rng::from_seed(&[3]);
        for _ in 0..64 {
            let begin = list.find_free(0x2000, Some(&mut rng)).unwrap();
            assert!(begin == va(0x1000) || begin == va(0x2000));
            let single = list.find_free(0x1000, Some(&mut rng)).unwrap();
            assert!(list.is_free(single, single + 0x1000));
        }
        assert_eq!(list.find_free(0x4000, Some(&mut rng)), Err(VmError::OutOfMemory));
    }
}
