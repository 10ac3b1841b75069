//! Simulated physical memory for host tests.
//!
//! Physical address `n` is byte `n` of a zero-initialized, 4 KiB-aligned
//! buffer. Nothing here is suitable for a real kernel.

use crate::{FrameAlloc, PhysMapper, Tlb};
use alloc::vec::Vec;
use core::cell::{RefCell, UnsafeCell};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

const FRAME: usize = 4096;

#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; FRAME]>);

/// `frames × 4 KiB` of RAM starting at physical address 0.
pub struct SimulatedRam {
    frames: Vec<Frame>,
}

impl SimulatedRam {
    #[must_use]
    pub fn new(frames: usize) -> Self {
        let mut v = Vec::with_capacity(frames);
        v.resize_with(frames, || Frame(UnsafeCell::new([0; FRAME])));
        Self { frames: v }
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// One past the last simulated byte.
    #[must_use]
    pub fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new((self.frames.len() * FRAME) as u64)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn byte_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let offset = pa.as_u64() as usize;
        assert!(
            offset < self.frames.len() * FRAME,
            "{pa:?} is outside simulated RAM"
        );
        let base = UnsafeCell::raw_get(self.frames.as_ptr().cast::<UnsafeCell<[u8; FRAME]>>());
        // SAFETY: in bounds of the contiguous frame buffer.
        unsafe { base.cast::<u8>().add(offset) }
    }

    /// Copies `len` bytes starting at `pa`.
    #[must_use]
    pub fn read(&self, pa: PhysicalAddress, len: usize) -> Vec<u8> {
        let mut out = alloc::vec![0; len];
        for (i, b) in out.iter_mut().enumerate() {
            // SAFETY: bounds are checked per byte.
            *b = unsafe { self.byte_ptr(pa + i as u64).read() };
        }
        out
    }

    /// Fills the 4 KiB frame at `frame` with `byte`.
    pub fn fill(&self, frame: PhysicalPage<Size4K>, byte: u8) {
        // SAFETY: a whole frame is in bounds when its first byte is.
        unsafe { self.byte_ptr(frame.base()).write_bytes(byte, FRAME) };
    }
}

impl PhysMapper for SimulatedRam {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.byte_ptr(pa).cast::<T>();
        debug_assert!(ptr.is_aligned(), "{pa:?} is misaligned for the requested type");
        unsafe { &mut *ptr }
    }
}

/// Hands out frames `[next, end)` in order and never reuses them.
pub struct BumpFrames {
    next: u64,
    end: u64,
    handed_out: usize,
}

impl BumpFrames {
    /// Frames with numbers `first..end`.
    #[must_use]
    pub const fn new(first: u64, end: u64) -> Self {
        Self {
            next: first,
            end,
            handed_out: 0,
        }
    }

    #[must_use]
    pub const fn handed_out(&self) -> usize {
        self.handed_out
    }
}

impl FrameAlloc for BumpFrames {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        if self.next >= self.end {
            return None;
        }
        let frame = PhysicalPage::from_number(self.next);
        self.next += 1;
        self.handed_out += 1;
        Some(frame)
    }
}

/// Records every invalidation request.
#[derive(Default)]
pub struct RecordingTlb {
    pages: RefCell<Vec<VirtualAddress>>,
    full: RefCell<usize>,
}

impl RecordingTlb {
    #[must_use]
    pub fn flushed_pages(&self) -> Vec<VirtualAddress> {
        self.pages.borrow().clone()
    }

    #[must_use]
    pub fn full_flushes(&self) -> usize {
        *self.full.borrow()
    }
}

impl Tlb for RecordingTlb {
    fn flush_page(&self, va: VirtualAddress) {
        self.pages.borrow_mut().push(va);
    }

    fn flush_all(&self) {
        *self.full.borrow_mut() += 1;
    }
}
