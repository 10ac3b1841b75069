//! # Bitmap Frame Allocator
//!
//! One bit per 4 KiB physical frame, `1` meaning "in use". Frames outside any
//! usable memory-map region start out as used and are never handed out.
//!
//! Allocation scans forward from a cursor and never wraps. Every
//! deallocation resets the cursor to frame 0, so a freed frame is found
//! again before the scan resumes past frames it has already visited.
//!
//! ```text
//!  word 0                     word 1
//! ┌──────────────────────────┬──────────────────────────┐
//! │ 1111 0000 0000 ... 0000  │ 0000 ... 1111 1111 1111  │
//! └──────────────────────────┴──────────────────────────┘
//!   ^ bit n of word w = frame 64*w + n
//! ```
//!
//! The bookkeeping does not care where the bitmap lives. Host tests hand in
//! a plain slice with [`BitmapFrameAllocator::with_storage`]; the kernel
//! carves the bitmap out of the first usable region with
//! [`BitmapFrameAllocator::from_memory_map`].

use kernel_info::boot::MemoryMapEntry;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, align_up};
use kernel_vmem::{FrameAlloc, PhysMapper};
use log::{debug, info};

const FRAME_SIZE: u64 = 4096;
const BITS: u64 = u64::BITS as u64;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    /// The first usable region is too small to hold the bitmap, or the
    /// provided storage is too short.
    #[error("not enough memory frames to hold the allocation bitmap")]
    NotEnoughMemoryFrames,
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("frame range is outside the managed memory")]
    OutOfRange,
    #[error("frame {0:?} is already deallocated")]
    FrameAlreadyDeallocated(PhysicalPage<Size4K>),
    #[error("zero-length frame request")]
    EmptyRequest,
}

/// Bitmap over all frames up to the highest usable one.
pub struct BitmapFrameAllocator<'a> {
    bitmap: &'a mut [u64],
    /// Highest usable frame index plus one.
    frame_count: u64,
    /// Next frame index to examine.
    next: u64,
    free: u64,
    usable: u64,
}

/// Whole frames covered by `entry`, as `[first, end)` frame indices.
const fn frame_span(entry: &MemoryMapEntry) -> (u64, u64) {
    if entry.is_empty() {
        return (0, 0);
    }
    let first = match align_up(entry.physical_start, FRAME_SIZE) {
        Some(start) => start / FRAME_SIZE,
        None => return (0, 0),
    };
    let end = match entry.physical_end.checked_add(1) {
        Some(end) => end / FRAME_SIZE,
        None => u64::MAX / FRAME_SIZE + 1,
    };
    if end <= first { (0, 0) } else { (first, end) }
}

/// Number of frames the bitmap needs to track, i.e. the highest usable
/// frame index plus one.
fn tracked_frames(map: &[MemoryMapEntry]) -> u64 {
    map.iter().map(|e| frame_span(e).1).max().unwrap_or(0)
}

/// Words of bitmap storage for `frames` bits.
#[allow(clippy::cast_possible_truncation)]
const fn words_for(frames: u64) -> usize {
    frames.div_ceil(BITS) as usize
}

impl<'a> BitmapFrameAllocator<'a> {
    /// Builds the allocator over caller-provided bitmap `storage`.
    ///
    /// # Errors
    /// [`FrameAllocError::NotEnoughMemoryFrames`] if `storage` has fewer
    /// words than the highest usable frame requires.
    pub fn with_storage(
        map: &[MemoryMapEntry],
        storage: &'a mut [u64],
    ) -> Result<Self, FrameAllocError> {
        let frame_count = tracked_frames(map);
        let words = words_for(frame_count);
        if storage.len() < words {
            return Err(FrameAllocError::NotEnoughMemoryFrames);
        }

        let bitmap = &mut storage[..words];
        bitmap.fill(u64::MAX);

        let mut allocator = Self {
            bitmap,
            frame_count,
            next: 0,
            free: 0,
            usable: 0,
        };

        for entry in map {
            let (first, end) = frame_span(entry);
            for index in first..end {
                if allocator.is_set(index) {
                    allocator.clear(index);
                    allocator.free += 1;
                }
            }
        }
        allocator.usable = allocator.free;

        debug!(
            "Frame bitmap tracks {} frames in {} words, {} usable",
            allocator.frame_count, words, allocator.usable
        );
        Ok(allocator)
    }

    /// Builds the allocator with its bitmap stored at the start of the first
    /// usable region.
    ///
    /// The region's start is advanced past the frames taken for the bitmap,
    /// so `map` afterwards describes only memory that is still free.
    ///
    /// # Errors
    /// [`FrameAllocError::NotEnoughMemoryFrames`] if the map is empty or the
    /// first region cannot hold the bitmap with at least one frame to spare.
    ///
    /// # Safety
    /// `mapper` must reach every frame of the first region writable, and
    /// that memory must not be in use by anything else for `'a`.
    #[allow(unsafe_code, clippy::cast_possible_truncation)]
    pub unsafe fn from_memory_map<M: PhysMapper>(
        map: &mut [MemoryMapEntry],
        mapper: &M,
    ) -> Result<Self, FrameAllocError> {
        let frame_count = tracked_frames(map);
        let words = words_for(frame_count);
        let needed = (words as u64 * 8).div_ceil(FRAME_SIZE);

        let first = map.first_mut().ok_or(FrameAllocError::NotEnoughMemoryFrames)?;
        let (first_frame, end_frame) = frame_span(first);
        if needed >= end_frame - first_frame {
            return Err(FrameAllocError::NotEnoughMemoryFrames);
        }

        let base = PhysicalAddress::from_frame_index(first_frame);
        first.physical_start = base.as_u64() + needed * FRAME_SIZE;

        // SAFETY: the first `needed` frames of region 0 are ours from now on.
        let storage = unsafe { mapper.phys_to_slice_mut::<u64>(base, words) };
        let allocator = Self::with_storage(map, storage)?;

        info!(
            "Frame allocator: {} of {} frames free ({} KiB), bitmap at {} uses {} frames",
            allocator.free,
            allocator.frame_count,
            allocator.free * FRAME_SIZE / 1024,
            base,
            needed
        );
        Ok(allocator)
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn is_set(&self, index: u64) -> bool {
        self.bitmap[(index / BITS) as usize] & (1 << (index % BITS)) != 0
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn set(&mut self, index: u64) {
        self.bitmap[(index / BITS) as usize] |= 1 << (index % BITS);
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn clear(&mut self, index: u64) {
        self.bitmap[(index / BITS) as usize] &= !(1 << (index % BITS));
    }

    /// First clear bit at or after `from`.
    #[allow(clippy::cast_possible_truncation)]
    fn next_clear(&self, from: u64) -> Option<u64> {
        let mut index = from;
        while index < self.frame_count {
            let word = self.bitmap[(index / BITS) as usize];
            if word == u64::MAX {
                index = (index / BITS + 1) * BITS;
                continue;
            }
            // Ignore bits below `index` in this word.
            let candidates = !word & (u64::MAX << (index % BITS));
            if candidates == 0 {
                index = (index / BITS + 1) * BITS;
                continue;
            }
            let found = (index / BITS) * BITS + u64::from(candidates.trailing_zeros());
            return (found < self.frame_count).then_some(found);
        }
        None
    }

    /// Allocates one frame.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] if no clear bit remains past the cursor.
    pub fn allocate(&mut self) -> Result<PhysicalPage<Size4K>, FrameAllocError> {
        let index = self
            .next_clear(self.next)
            .ok_or(FrameAllocError::OutOfMemory)?;
        self.set(index);
        self.next = index + 1;
        self.free -= 1;
        Ok(PhysicalPage::from_number(index))
    }

    /// Allocates `count` physically consecutive frames and returns the first.
    ///
    /// # Errors
    /// - [`FrameAllocError::EmptyRequest`] if `count` is zero.
    /// - [`FrameAllocError::OutOfMemory`] if no run of `count` clear bits
    ///   exists past the cursor.
    pub fn allocate_contiguous(
        &mut self,
        count: u64,
    ) -> Result<PhysicalPage<Size4K>, FrameAllocError> {
        if count == 0 {
            return Err(FrameAllocError::EmptyRequest);
        }

        let mut candidate = self.next;
        loop {
            candidate = self
                .next_clear(candidate)
                .ok_or(FrameAllocError::OutOfMemory)?;
            let end = candidate
                .checked_add(count)
                .filter(|&end| end <= self.frame_count)
                .ok_or(FrameAllocError::OutOfMemory)?;

            match (candidate..end).find(|&i| self.is_set(i)) {
                Some(blocker) => candidate = blocker + 1,
                None => {
                    for index in candidate..end {
                        self.set(index);
                    }
                    self.next = end;
                    self.free -= count;
                    return Ok(PhysicalPage::from_number(candidate));
                }
            }
        }
    }

    /// Returns `frame` to the pool and resets the cursor.
    ///
    /// # Errors
    /// - [`FrameAllocError::OutOfRange`] past the highest tracked frame.
    /// - [`FrameAllocError::FrameAlreadyDeallocated`] if the frame is free.
    pub fn deallocate(&mut self, frame: PhysicalPage<Size4K>) -> Result<(), FrameAllocError> {
        self.deallocate_contiguous(frame, 1)
    }

    /// Returns `count` consecutive frames starting at `first`.
    ///
    /// Nothing is changed unless every frame in the run is allocated.
    ///
    /// # Errors
    /// As [`deallocate`](Self::deallocate), for any frame of the run.
    pub fn deallocate_contiguous(
        &mut self,
        first: PhysicalPage<Size4K>,
        count: u64,
    ) -> Result<(), FrameAllocError> {
        if count == 0 {
            return Err(FrameAllocError::EmptyRequest);
        }
        let start = first.number();
        let end = start
            .checked_add(count)
            .filter(|&end| end <= self.frame_count)
            .ok_or(FrameAllocError::OutOfRange)?;

        if let Some(index) = (start..end).find(|&i| !self.is_set(i)) {
            return Err(FrameAllocError::FrameAlreadyDeallocated(
                PhysicalPage::from_number(index),
            ));
        }

        for index in start..end {
            self.clear(index);
        }
        self.free += count;
        self.next = 0;
        Ok(())
    }

    /// Whether `frame` is in use. Untracked frames count as in use.
    #[must_use]
    pub fn is_allocated(&self, frame: PhysicalPage<Size4K>) -> bool {
        frame.number() >= self.frame_count || self.is_set(frame.number())
    }

    #[must_use]
    pub const fn free_frames(&self) -> u64 {
        self.free
    }

    /// Frames that were usable when the allocator was built.
    #[must_use]
    pub const fn total_frames(&self) -> u64 {
        self.usable
    }

    /// Bytes of physical address space covered by the bitmap.
    #[must_use]
    pub const fn managed_bytes(&self) -> u64 {
        self.frame_count * FRAME_SIZE
    }
}

impl FrameAlloc for BitmapFrameAllocator<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.allocate().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::sim::SimulatedRam;

    fn frame(n: u64) -> PhysicalPage<Size4K> {
        PhysicalPage::from_number(n)
    }

    #[test]
    fn partial_frames_at_region_edges_are_skipped() {
        let entry = MemoryMapEntry::new(0x1800, 0x4fff);
        assert_eq!(frame_span(&entry), (2, 5));
        let tiny = MemoryMapEntry::new(0x1001, 0x1fff);
        assert_eq!(frame_span(&tiny), (0, 0));
    }

    #[test]
    fn holes_stay_allocated() {
        let map = [
            MemoryMapEntry::new(0x0000, 0x3fff),
            MemoryMapEntry::new(0x8000, 0x9fff),
        ];
        let mut storage = [0u64; 1];
        let mut frames = BitmapFrameAllocator::with_storage(&map, &mut storage).unwrap();
        assert_eq!(frames.total_frames(), 6);
        assert!(frames.is_allocated(frame(4)));
        assert!(frames.is_allocated(frame(10)));

        let got: Vec<_> = (0..6).map(|_| frames.allocate().unwrap().number()).collect();
        assert_eq!(got, [0, 1, 2, 3, 8, 9]);
        assert_eq!(frames.allocate(), Err(FrameAllocError::OutOfMemory));
    }

    #[test]
    fn storage_too_short() {
        let map = [MemoryMapEntry::new(0, 65 * 4096 - 1)];
        let mut storage = [0u64; 1];
        assert!(matches!(
            BitmapFrameAllocator::with_storage(&map, &mut storage),
            Err(FrameAllocError::NotEnoughMemoryFrames)
        ));
    }

    #[test]
    fn contiguous_skips_past_blocker() {
        let map = [MemoryMapEntry::new(0, 16 * 4096 - 1)];
        let mut storage = [0u64; 1];
        let mut frames = BitmapFrameAllocator::with_storage(&map, &mut storage).unwrap();

        let a = frames.allocate_contiguous(3).unwrap();
        assert_eq!(a, frame(0));
        frames.allocate().unwrap(); // 3
        frames.deallocate(frame(1)).unwrap();

        // Frame 1 alone is free, run of 2 must start at 4.
        assert_eq!(frames.allocate_contiguous(2), Ok(frame(4)));
        assert_eq!(frames.free_frames(), 16 - 5);
        assert_eq!(frames.allocate_contiguous(11), Err(FrameAllocError::OutOfMemory));
        assert_eq!(frames.allocate_contiguous(0), Err(FrameAllocError::EmptyRequest));
    }

    #[test]
    fn double_free_and_range_checks() {
        let map = [MemoryMapEntry::new(0, 8 * 4096 - 1)];
        let mut storage = [0u64; 1];
        let mut frames = BitmapFrameAllocator::with_storage(&map, &mut storage).unwrap();
        let f = frames.allocate_contiguous(4).unwrap();

        frames.deallocate(frame(2)).unwrap();
        assert_eq!(
            frames.deallocate(frame(2)),
            Err(FrameAllocError::FrameAlreadyDeallocated(frame(2)))
        );
        // A run that includes a free frame changes nothing.
        assert_eq!(
            frames.deallocate_contiguous(f, 4),
            Err(FrameAllocError::FrameAlreadyDeallocated(frame(2)))
        );
        assert!(frames.is_allocated(frame(3)));
        assert_eq!(frames.deallocate(frame(8)), Err(FrameAllocError::OutOfRange));
        assert_eq!(
            frames.deallocate_contiguous(frame(6), 3),
            Err(FrameAllocError::OutOfRange)
        );
    }

    #[test]
    fn bitmap_is_carved_from_first_region() {
        let ram = SimulatedRam::new(8);
        let mut map = [
            MemoryMapEntry::new(0x1000, 0x4fff),
            MemoryMapEntry::new(0x6000, 0x7fff),
        ];
        #[allow(unsafe_code)]
        let mut frames = unsafe { BitmapFrameAllocator::from_memory_map(&mut map, &ram) }.unwrap();

        assert_eq!(map[0].physical_start, 0x2000);
        assert!(frames.is_allocated(frame(1)));
        assert_eq!(frames.total_frames(), 5);
        assert_eq!(frames.managed_bytes(), 8 * 4096);
        assert_eq!(frames.allocate(), Ok(frame(2)));

        // The bitmap itself lives in frame 1.
        let word = ram.read(PhysicalAddress::new(0x1000), 1)[0];
        assert_eq!(word & 0b111, 0b111);
    }

    #[test]
    fn first_region_too_small_for_bitmap() {
        let ram = SimulatedRam::new(2);
        let mut map = [MemoryMapEntry::new(0x1000, 0x1fff)];
        #[allow(unsafe_code)]
        let result = unsafe { BitmapFrameAllocator::from_memory_map(&mut map, &ram) };
        assert!(matches!(result, Err(FrameAllocError::NotEnoughMemoryFrames)));

        let mut empty: [MemoryMapEntry; 0] = [];
        #[allow(unsafe_code)]
        let result = unsafe { BitmapFrameAllocator::from_memory_map(&mut empty, &ram) };
        assert!(matches!(result, Err(FrameAllocError::NotEnoughMemoryFrames)));
    }
}
