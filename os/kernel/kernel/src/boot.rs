//! # Bring-up
//!
//! The loader jumps to [`_start_kernel`] with interrupts off, on its own
//! stack, with the kernel mapped at `KERNEL_BASE` and all physical memory in
//! the direct map. Bring-up then runs in this order:
//!
//! 1. `EFER.SCE`/`EFER.NXE`, logger, kernel parameters.
//! 2. Physical frames from the loader's memory map, the kernel window
//!    allocator and the scheduler (the boot thread becomes the idle thread).
//! 3. GDT/TSS, IDT, `syscall` MSRs, legacy PIC masked.
//! 4. Local APIC mapped through the kernel window and enabled.
//! 5. Built-in user programs started, state published to the trap path,
//!    timer armed.
//!
//! After that the boot thread only reaps terminated processes and halts.

use crate::apic::LocalApic;
use crate::{cpu, entropy, pic, syscall, traps};
use arrayvec::ArrayVec;
use core::arch::asm;
use kernel_alloc::phys_mapper::HhdmPhysMapper;
use kernel_alloc::{
    BitmapFrameAllocator, ChaCha20Rng, FrameAllocError, VirtualMemoryAllocator, VmContext,
    VmError,
};
use kernel_info::boot::{KernelBootInfo, MemoryMapEntry};
use kernel_info::memory::{KERNEL_PML4_ENTRIES, KERNEL_STACK_SIZE, REGION_POOL_FRAMES};
use kernel_info::params::KernelParams;
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress};
use kernel_qemu::{QemuLogger, Sink, qemu_trace};
use kernel_sched::{KernelContext, SchedError, SchedulerConfig};
use kernel_sync::{IrqCell, Reentered, SyncOnceCell};
use kernel_syscall::programs::{BAD_SYSCALL, INVALID_OPCODE, print_loop, print_once};
use kernel_vmem::{HardwareTlb, PageFlags};
use log::{LevelFilter, debug, error, info, warn};

/// Load address of every built-in program.
const USER_ENTRY: VirtualAddress = VirtualAddress::new(0x40_0000);

/// Loader map entries beyond this are ignored.
const MAX_MEMORY_REGIONS: usize = 128;

const LAPIC_WINDOW: u64 = 4096;

static PRINT_A: [u8; 21] = print_loop(b'A');
static PRINT_B: [u8; 21] = print_loop(b'B');
static PRINT_C_ONCE: [u8; 18] = print_once(b'C');

static PROGRAMS: [(&str, &[u8]); 5] = [
    ("print-A", &PRINT_A),
    ("print-B", &PRINT_B),
    ("print-C-once", &PRINT_C_ONCE),
    ("invalid-opcode", &INVALID_OPCODE),
    ("bad-syscall", &BAD_SYSCALL),
];

#[repr(C, align(16))]
struct BootStack([u8; KERNEL_STACK_SIZE]);

#[unsafe(link_section = ".bss.boot")]
static mut BOOT_STACK: BootStack = BootStack([0; KERNEL_STACK_SIZE]);

static MAPPER: SyncOnceCell<HhdmPhysMapper> = SyncOnceCell::new();
static TLB: HardwareTlb = HardwareTlb;

/// All kernel state, published once bring-up is complete.
pub static KERNEL: IrqCell<Option<Kernel>> = IrqCell::new(None);

pub struct Kernel(pub KernelContext<'static, HhdmPhysMapper>);

// SAFETY: there is one CPU and the context is only reached through
// `KERNEL`, which masks interrupts and rejects nested access.
unsafe impl Send for Kernel {}

#[derive(Debug, thiserror::Error)]
enum BootError {
    #[error(transparent)]
    Frames(#[from] FrameAllocError),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error(transparent)]
    Sched(#[from] SchedError),
    #[error(transparent)]
    Reentered(#[from] Reentered),
    #[error("the direct-map mapper was already initialized")]
    MapperInitialized,
}

#[unsafe(naked)]
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text._start_kernel")]
pub extern "sysv64" fn _start_kernel(_info: *const KernelBootInfo) -> ! {
    core::arch::naked_asm!(
        "cli",
        "lea rsp, [rip + {stack}]",
        "add rsp, {size}",
        "and rsp, -16",
        "xor ebp, ebp",
        // rdi still holds the boot info pointer.
        "call {entry}",
        "2:",
        "hlt",
        "jmp 2b",
        stack = sym BOOT_STACK,
        size = const KERNEL_STACK_SIZE,
        entry = sym kernel_entry,
    );
}

extern "C" fn kernel_entry(info: *const KernelBootInfo) -> ! {
    cpu::enable_features();

    // SAFETY: the loader hands over a valid, direct-mapped boot info block
    // that is never reclaimed.
    let info: &'static KernelBootInfo = unsafe { &*info };

    // Everything passes the backend until `LogLevel` is known, so warnings
    // about the parameters themselves are not lost.
    if let Err(e) = QemuLogger::new(LevelFilter::Trace, &[Sink::DebugCon, Sink::Com1]).init() {
        qemu_trace!("logger unavailable: {e}\n");
    }
    let args = unsafe { info.args.as_str() };
    let params = KernelParams::parse(args).unwrap_or_else(|e| {
        warn!("ignoring kernel parameters: {e}");
        KernelParams::default()
    });
    log::set_max_level(params.log_level);
    info!("kernel entered; args: {args:?}");

    if let Err(e) = boot(info, &params) {
        error!("bring-up failed: {e}");
        cpu::halt();
    }
    idle()
}

fn boot(info: &'static KernelBootInfo, params: &KernelParams<'_>) -> Result<(), BootError> {
    let mapper = MAPPER
        .set(HhdmPhysMapper::new(info.physical_memory_offset))
        .map_err(|_| BootError::MapperInitialized)?;

    let mut map: ArrayVec<MemoryMapEntry, MAX_MEMORY_REGIONS> = ArrayVec::new();
    // SAFETY: the loader's map stays in boot data that is never reclaimed.
    for entry in unsafe { info.memory_map.entries() } {
        if map.try_push(*entry).is_err() {
            warn!("memory map has more than {MAX_MEMORY_REGIONS} regions; the rest is unused");
            break;
        }
    }
    // SAFETY: the loader's map excludes the kernel image, its page tables
    // and the boot info, and the direct map covers every listed frame.
    let frames = unsafe { BitmapFrameAllocator::from_memory_map(&mut map, mapper)? };
    info!(
        "{} of {} frames free ({} MiB managed)",
        frames.free_frames(),
        frames.total_frames(),
        frames.managed_bytes() >> 20
    );

    let rng = ChaCha20Rng::from_seed(&entropy::seed([
        info.pml4_phys,
        info.kernel_image.physical_start,
        info.physical_memory_size,
        info.rsdp_addr,
    ]));
    let mut memory = VmContext::new(frames, mapper, &TLB, rng, params.aslr);

    let root = PhysicalAddress::new(info.pml4_phys).page::<Size4K>();
    let kernel_vm = VirtualMemoryAllocator::init_kernel(
        &mut memory,
        root,
        REGION_POOL_FRAMES as u64,
        KERNEL_PML4_ENTRIES,
        &committed_ranges(info),
    )?;
    debug!("kernel window: {} bytes free", kernel_vm.free_bytes());

    let stack_top =
        VirtualAddress::from_ptr(&raw const BOOT_STACK) + KERNEL_STACK_SIZE as u64;
    let mut kernel =
        KernelContext::new(memory, kernel_vm, stack_top, SchedulerConfig::from_params(params))?;
    info!("scheduler ready; ASLR {}", if kernel.config.aslr { "on" } else { "off" });

    // SAFETY: CPL 0, interrupts off, each called exactly once in this order.
    unsafe {
        cpu::init(stack_top);
        traps::init();
        syscall::init();
        pic::remap_and_mask();
    }

    // SAFETY: CPL 0.
    let apic_phys = unsafe { LocalApic::physical_base() };
    let apic =
        kernel
            .kernel_vm
            .allocate_mmio(&mut kernel.memory, apic_phys, LAPIC_WINDOW, PageFlags::MMIO)?;
    // SAFETY: `apic` maps the register page uncached and is never released.
    unsafe { LocalApic::enable(apic) };

    info!(
        "InitProcess={}: no filesystem is available, starting the built-in programs",
        params.init_process
    );
    for (name, code) in &PROGRAMS {
        let pid = kernel.create_process(USER_ENTRY)?;
        kernel.load_segment(pid, USER_ENTRY, code, PageFlags::USER_CODE)?;
        info!("started `{name}` as process {pid}");
    }

    KERNEL.with(|slot| *slot = Some(Kernel(kernel)))?;
    LocalApic::start_timer();
    Ok(())
}

/// Kernel-half ranges the loader already populated: the kernel image, the
/// direct map and the framebuffer as seen through it.
fn committed_ranges(info: &KernelBootInfo) -> ArrayVec<(VirtualAddress, VirtualAddress), 3> {
    let hhdm = VirtualAddress::new(info.physical_memory_offset);
    let mut ranges = ArrayVec::new();
    ranges.push(info.kernel_image.virtual_range());
    ranges.push((hhdm, hhdm + info.physical_memory_size));
    if let Some((base, len)) = info.framebuffer.physical_range() {
        let start = hhdm + base.as_u64();
        ranges.push((start, start + len));
    }
    ranges
}

/// The boot thread's life after bring-up: reap, then sleep until the next
/// interrupt.
fn idle() -> ! {
    loop {
        match KERNEL.with(|kernel| kernel.as_mut().map_or(0, |k| k.0.reap())) {
            Ok(0) => {}
            Ok(n) => debug!("reaped {n} terminated process(es)"),
            Err(e) => warn!("idle loop: {e}"),
        }
        // SAFETY: `sti` takes effect after the next instruction, so a pending
        // interrupt wakes the `hlt` instead of being taken before it.
        unsafe { asm!("sti", "hlt", options(nomem, nostack)) };
    }
}
