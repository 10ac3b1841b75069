use kernel_alloc::{BitmapFrameAllocator, ChaCha20Rng, VirtualMemoryAllocator, VmContext, VmError};
use kernel_info::boot::MemoryMapEntry;
use kernel_info::memory::{
    HHDM_BASE, KERNEL_BASE, KERNEL_PML4_ENTRIES, KERNEL_WINDOW_START, LAST_TRACKED_ADDRESS,
    USER_SPACE_END,
};
use kernel_memory_addresses::{PageTableLevel, PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::sim::{RecordingTlb, SimulatedRam};
use kernel_vmem::{AddressSpace, PageFlags, PageTableError};

type Ctx<'k> = VmContext<'k, SimulatedRam>;

/// Runs `f` against `frames` frames of simulated RAM. Frame 0 is kept out of
/// the allocator.
fn with_context(
    frames: usize,
    aslr: bool,
    seed: u64,
    f: impl FnOnce(&SimulatedRam, &RecordingTlb, &mut Ctx<'_>),
) {
    let ram = SimulatedRam::new(frames);
    let map = [MemoryMapEntry::new(0x1000, frames as u64 * 4096 - 1)];
    let mut storage = vec![0u64; frames.div_ceil(64)];
    let tlb = RecordingTlb::default();
    let allocator = BitmapFrameAllocator::with_storage(&map, &mut storage).unwrap();
    let mut ctx = VmContext::new(allocator, &ram, &tlb, ChaCha20Rng::from_seed(&[seed]), aslr);
    f(&ram, &tlb, &mut ctx);
}

fn new_root(ctx: &mut Ctx<'_>) -> PhysicalPage<Size4K> {
    AddressSpace::create(ctx.mapper, &mut ctx.frames).unwrap().root()
}

fn va(v: u64) -> VirtualAddress {
    VirtualAddress::new(v)
}

#[test]
fn backed_allocations_never_overlap() {
    with_context(512, true, 11, |_, _, ctx| {
        let root = new_root(ctx);
        let mut vm = VirtualMemoryAllocator::init_process(ctx, root, 1).unwrap();

        let mut ranges: Vec<(u64, u64)> = Vec::new();
        for size in [0x1000, 0x3000, 0x2000, 0x1000, 0x8000, 0x1000] {
            let begin = vm.allocate_backed(ctx, size, PageFlags::USER_DATA).unwrap();
            let (b, e) = (begin.as_u64(), begin.as_u64() + size);
            assert!(e <= USER_SPACE_END, "{begin:?} is outside the lower half");
            for &(ob, oe) in &ranges {
                assert!(e <= ob || b >= oe, "[{b:#x}, {e:#x}) overlaps [{ob:#x}, {oe:#x})");
            }
            ranges.push((b, e));
        }

        let space = ctx.space(root);
        let mut frames: Vec<PhysicalAddress> = ranges
            .iter()
            .flat_map(|&(b, e)| (b..e).step_by(4096))
            .map(|page| space.translate(va(page)).unwrap())
            .collect();
        let mapped = frames.len();
        frames.sort();
        frames.dedup();
        assert_eq!(frames.len(), mapped, "a frame backs two pages");
    });
}

#[test]
fn successive_allocations_differ() {
    with_context(256, true, 99, |_, _, ctx| {
        let root = new_root(ctx);
        let mut vm = VirtualMemoryAllocator::init_process(ctx, root, 1).unwrap();
        let a = vm.allocate_backed(ctx, 0x1000, PageFlags::USER_DATA).unwrap();
        let b = vm.allocate_backed(ctx, 0x1000, PageFlags::USER_DATA).unwrap();
        assert_ne!(a, b);
    });

    let mut firsts = Vec::new();
    for seed in [1, 2] {
        with_context(256, true, seed, |_, _, ctx| {
            let root = new_root(ctx);
            let mut vm = VirtualMemoryAllocator::init_process(ctx, root, 1).unwrap();
            firsts.push(vm.allocate_backed(ctx, 0x1000, PageFlags::USER_DATA).unwrap());
        });
    }
    assert_ne!(firsts[0], firsts[1]);
}

#[test]
fn without_aslr_the_lowest_range_wins() {
    with_context(256, false, 0, |_, _, ctx| {
        let root = new_root(ctx);
        let mut vm = VirtualMemoryAllocator::init_process(ctx, root, 1).unwrap();
        assert_eq!(vm.allocate_backed(ctx, 0x2000, PageFlags::USER_DATA), Ok(va(0x1000)));
        assert_eq!(vm.allocate_backed(ctx, 0x1000, PageFlags::USER_DATA), Ok(va(0x3000)));
    });
}

#[test]
fn deallocation_returns_frames_and_range() {
    with_context(256, true, 5, |_, tlb, ctx| {
        let root = new_root(ctx);
        let mut vm = VirtualMemoryAllocator::init_process(ctx, root, 1).unwrap();
        let free_bytes = vm.free_bytes();

        let begin = vm.allocate_backed(ctx, 0x3000, PageFlags::USER_DATA).unwrap();
        let frames_after_alloc = ctx.frames.free_frames();
        assert_eq!(vm.free_bytes(), free_bytes - 0x3000);

        vm.deallocate_backed(ctx, begin, 0x3000).unwrap();
        assert_eq!(ctx.frames.free_frames(), frames_after_alloc + 3);
        assert_eq!(vm.free_bytes(), free_bytes);
        assert_eq!(tlb.flushed_pages(), [begin, begin + 0x1000, begin + 0x2000]);
        assert!(ctx.space(root).translate(begin).is_err());

        assert_eq!(
            vm.deallocate_backed(ctx, begin, 0x1000),
            Err(VmError::PageTable(PageTableError::PageAlreadyUnmapped(begin)))
        );
    });
}

#[test]
fn backed_memory_starts_zeroed() {
    with_context(64, true, 8, |ram, _, ctx| {
        let root = new_root(ctx);
        let mut vm = VirtualMemoryAllocator::init_process(ctx, root, 1).unwrap();
        let at = va(0x40_0000);

        vm.allocate_backed_at(ctx, at, 0x1000, PageFlags::USER_DATA).unwrap();
        let pa = ctx.space(root).translate(at).unwrap();
        ram.fill(pa.page(), 0xAA);
        vm.deallocate_backed(ctx, at, 0x1000).unwrap();

        vm.allocate_backed_at(ctx, at, 0x1000, PageFlags::USER_DATA).unwrap();
        let pa = ctx.space(root).translate(at).unwrap();
        assert!(ram.read(pa, 4096).iter().all(|&b| b == 0));
    });
}

#[test]
fn fixed_address_must_be_free() {
    with_context(64, true, 8, |_, _, ctx| {
        let root = new_root(ctx);
        let mut vm = VirtualMemoryAllocator::init_process(ctx, root, 1).unwrap();
        vm.allocate_backed_at(ctx, va(0x7000_0000), 0x4000, PageFlags::USER_DATA).unwrap();

        assert_eq!(
            vm.allocate_backed_at(ctx, va(0x7000_2000), 0x1000, PageFlags::USER_DATA),
            Err(VmError::NotFound)
        );
        assert_eq!(
            vm.allocate_backed_at(ctx, va(USER_SPACE_END), 0x1000, PageFlags::USER_DATA),
            Err(VmError::NotFound)
        );
        assert_eq!(
            vm.allocate_backed_at(ctx, va(0x7000_0800), 0x1000, PageFlags::USER_DATA),
            Err(VmError::InvalidPageAlignment)
        );
    });
}

#[test]
fn mmio_maps_device_frames_without_allocating() {
    with_context(64, false, 0, |_, tlb, ctx| {
        let root = new_root(ctx);
        let mut vm = VirtualMemoryAllocator::init_process(ctx, root, 1).unwrap();
        let lapic = PhysicalAddress::new(0xfee0_0000);

        let window = vm.allocate_mmio(ctx, lapic, 0x2000, PageFlags::MMIO).unwrap();
        assert_eq!(ctx.space(root).translate(window + 0x1020).unwrap(), lapic + 0x1020);

        let free = ctx.frames.free_frames();
        vm.deallocate_mmio(ctx, window, 0x2000).unwrap();
        assert_eq!(ctx.frames.free_frames(), free);
        assert_eq!(tlb.flushed_pages().len(), 2);
        assert!(ctx.space(root).translate(window).is_err());

        assert_eq!(
            vm.allocate_mmio(ctx, lapic + 0x10, 0x1000, PageFlags::MMIO),
            Err(VmError::InvalidPageAlignment)
        );
    });
}

#[test]
fn kernel_allocations_stay_in_the_shared_window() {
    with_context(256, true, 21, |_, _, ctx| {
        let kernel_root = new_root(ctx);
        let image = (va(KERNEL_BASE), va(KERNEL_BASE + 0x20_0000));
        let direct_map = (va(HHDM_BASE), va(HHDM_BASE + 0x4000_0000));
        let mut kernel = VirtualMemoryAllocator::init_kernel(
            ctx,
            kernel_root,
            1,
            KERNEL_PML4_ENTRIES,
            &[image, direct_map],
        )
        .unwrap();

        assert_eq!(
            kernel.free_bytes(),
            LAST_TRACKED_ADDRESS - KERNEL_WINDOW_START - 0x20_0000
        );
        let kernel_space = ctx.space(kernel_root);
        assert!(kernel_space.pml4_entry(510).present());
        assert!(kernel_space.pml4_entry(511).present());

        // A process created before the allocation still sees it.
        let process_root = new_root(ctx);
        let process = ctx.space(process_root);
        process.copy_kernel_half(&kernel_space);

        for _ in 0..16 {
            let stack = kernel.allocate_backed(ctx, 0x4000, PageFlags::KERNEL_DATA).unwrap();
            assert!(stack.as_u64() >= KERNEL_WINDOW_START);
            let end = stack.as_u64() + 0x4000;
            assert!(end <= KERNEL_BASE || stack.as_u64() >= KERNEL_BASE + 0x20_0000);
            assert_eq!(process.translate(stack), kernel_space.translate(stack));
            let slot = stack.table_index(PageTableLevel::Pml4);
            assert!(!process.pml4_entry(slot).user());
        }
    });
}

#[test]
fn releasing_the_pool_returns_its_frames() {
    with_context(64, true, 3, |_, _, ctx| {
        let root = new_root(ctx);
        let before = ctx.frames.free_frames();
        let vm = VirtualMemoryAllocator::init_process(ctx, root, 4).unwrap();
        assert_eq!(ctx.frames.free_frames(), before - 4);
        vm.release(ctx).unwrap();
        assert_eq!(ctx.frames.free_frames(), before);
    });
}

#[test]
fn running_out_of_frames_keeps_what_was_mapped() {
    with_context(16, false, 0, |_, _, ctx| {
        let root = new_root(ctx);
        let mut vm = VirtualMemoryAllocator::init_process(ctx, root, 1).unwrap();
        let free_bytes = vm.free_bytes();

        let result = vm.allocate_backed(ctx, 0x40_0000, PageFlags::USER_DATA);
        assert!(matches!(result, Err(VmError::Frame(_) | VmError::PageTable(_))));
        assert_eq!(ctx.frames.free_frames(), 0);
        // The range was never marked used.
        assert_eq!(vm.free_bytes(), free_bytes);
        assert!(ctx.space(root).translate(va(0x1000)).is_ok());
    });
}
