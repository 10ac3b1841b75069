use kernel_alloc::{BitmapFrameAllocator, FrameAllocError};
use kernel_info::boot::MemoryMapEntry;
use kernel_memory_addresses::{PhysicalPage, Size4K};
use std::collections::HashSet;

fn frame(n: u64) -> PhysicalPage<Size4K> {
    PhysicalPage::from_number(n)
}

/// Two back-to-back 16-frame regions.
const TWO_REGIONS: [MemoryMapEntry; 2] = [
    MemoryMapEntry::new(0x0_0000, 0x0_ffff),
    MemoryMapEntry::new(0x1_0000, 0x1_ffff),
];

#[test]
fn sequential_allocation_walks_both_regions() {
    let mut storage = [0u64; 1];
    let mut frames = BitmapFrameAllocator::with_storage(&TWO_REGIONS, &mut storage).unwrap();
    assert_eq!(frames.total_frames(), 32);

    let got: Vec<u64> = (0..20).map(|_| frames.allocate().unwrap().number()).collect();
    assert_eq!(got, (0..20).collect::<Vec<_>>());
    assert_eq!(frames.free_frames(), 12);
}

#[test]
fn freed_frame_is_found_before_the_cursor_moves_on() {
    let mut storage = [0u64; 1];
    let mut frames = BitmapFrameAllocator::with_storage(&TWO_REGIONS, &mut storage).unwrap();
    for _ in 0..20 {
        frames.allocate().unwrap();
    }

    frames.deallocate(frame(5)).unwrap();
    assert!(!frames.is_allocated(frame(5)));
    assert_eq!(frames.allocate(), Ok(frame(5)));
    assert_eq!(frames.allocate(), Ok(frame(20)));
}

#[test]
fn frames_are_never_handed_out_twice() {
    let map = [
        MemoryMapEntry::new(0x1000, 0x2_0fff),
        MemoryMapEntry::new(0x10_0000, 0x10_ffff),
    ];
    let mut storage = [0u64; 5];
    let mut frames = BitmapFrameAllocator::with_storage(&map, &mut storage).unwrap();
    let total = frames.total_frames();

    let mut seen = HashSet::new();
    while let Ok(f) = frames.allocate() {
        assert!(seen.insert(f), "{f:?} handed out twice");
    }
    assert_eq!(seen.len() as u64, total);
    assert_eq!(frames.allocate(), Err(FrameAllocError::OutOfMemory));

    // Everything comes back exactly once.
    for f in &seen {
        frames.deallocate(*f).unwrap();
    }
    for f in &seen {
        assert_eq!(frames.deallocate(*f), Err(FrameAllocError::FrameAlreadyDeallocated(*f)));
    }
    assert_eq!(frames.free_frames(), total);
}

#[test]
fn contiguous_runs_do_not_cross_holes() {
    // Frames 0..4 and 6..16, with frame 5 missing.
    let map = [
        MemoryMapEntry::new(0x0000, 0x4fff),
        MemoryMapEntry::new(0x6000, 0xffff),
    ];
    let mut storage = [0u64; 1];
    let mut frames = BitmapFrameAllocator::with_storage(&map, &mut storage).unwrap();

    let run = frames.allocate_contiguous(8).unwrap();
    assert_eq!(run, frame(6));
    for n in 6..14 {
        assert!(frames.is_allocated(frame(n)));
    }
    frames.deallocate_contiguous(run, 8).unwrap();
    assert_eq!(frames.free_frames(), 15);
    assert_eq!(frames.allocate_contiguous(5), Ok(frame(0)));
}
