#![allow(dead_code)]

use kernel_alloc::{BitmapFrameAllocator, ChaCha20Rng, VirtualMemoryAllocator, VmContext};
use kernel_info::boot::MemoryMapEntry;
use kernel_info::memory::KERNEL_PML4_ENTRIES;
use kernel_memory_addresses::VirtualAddress;
use kernel_sched::{CpuContext, KernelContext, ProcessId, SchedulerConfig};
use kernel_syscall::SyscallHost;
use kernel_vmem::AddressSpace;
use kernel_vmem::sim::{RecordingTlb, SimulatedRam};

pub type Kernel<'k> = KernelContext<'k, SimulatedRam>;

pub const IDLE_STACK_TOP: u64 = 0xffff_ffff_8020_0000;
pub const ENTRY: u64 = 0x40_0000;

/// A kernel over `frames` frames of simulated RAM, frame 0 excluded.
pub fn with_kernel(frames: usize, aslr: bool, f: impl FnOnce(&SimulatedRam, &mut Kernel<'_>)) {
    let ram = SimulatedRam::new(frames);
    let map = [MemoryMapEntry::new(0x1000, frames as u64 * 4096 - 1)];
    let mut storage = vec![0u64; frames.div_ceil(64)];
    let tlb = RecordingTlb::default();
    let allocator = BitmapFrameAllocator::with_storage(&map, &mut storage).unwrap();
    let mut memory = VmContext::new(allocator, &ram, &tlb, ChaCha20Rng::from_seed(&[7]), aslr);

    let root = AddressSpace::create(memory.mapper, &mut memory.frames)
        .unwrap()
        .root();
    let kernel_vm =
        VirtualMemoryAllocator::init_kernel(&mut memory, root, 1, KERNEL_PML4_ENTRIES, &[])
            .unwrap();
    let config = SchedulerConfig {
        region_pool_frames: 1,
        aslr,
        ..SchedulerConfig::default()
    };
    let mut kernel =
        KernelContext::new(memory, kernel_vm, VirtualAddress::new(IDLE_STACK_TOP), config)
            .unwrap();
    f(&ram, &mut kernel);
}

pub fn spawn(kernel: &mut Kernel<'_>) -> ProcessId {
    kernel.create_process(VirtualAddress::new(ENTRY)).unwrap()
}

/// Switches away from whatever runs now; panics if nothing else is ready.
pub fn switch(kernel: &mut Kernel<'_>, saved: &mut CpuContext) -> ProcessId {
    kernel.schedule(saved).expect("a thread switch");
    kernel.scheduler.current_process()
}

#[derive(Default)]
pub struct DebugPort(pub Vec<u8>);

impl SyscallHost for DebugPort {
    fn debug_write(&mut self, byte: u8) {
        self.0.push(byte);
    }
}
