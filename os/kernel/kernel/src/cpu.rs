//! # Per-CPU state
//!
//! One CPU, one [`PerCpu`] block in `.bss`. `KERNEL_GS_BASE` points at it so
//! the `syscall` stub can reach its two scratch words with `gs:` after
//! `swapgs`; the GDT and TSS live here because they must outlive every
//! `lgdt`/`ltr` that references them.

use crate::gdt::{self, Gdt};
use crate::tss::{Ist, Tss64};
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::efer::Efer;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

const IST_STACK_SIZE: usize = 16 * 1024;

#[repr(C, align(64))]
pub struct PerCpu {
    /// Stack the `syscall` stub switches to; mirrors `tss.rsp0`.
    pub syscall_stack_top: u64,
    /// User RSP parked by the `syscall` stub while it switches stacks.
    pub user_rsp: u64,
    pub tss: Tss64,
    pub gdt: Gdt,
}

pub static mut PER_CPU: PerCpu = PerCpu {
    syscall_stack_top: 0,
    user_rsp: 0,
    tss: Tss64::new(),
    gdt: Gdt::EMPTY,
};

#[repr(C, align(16))]
struct IstStack([u8; IST_STACK_SIZE]);

static mut DOUBLE_FAULT_STACK: IstStack = IstStack([0; IST_STACK_SIZE]);
static mut PAGE_FAULT_STACK: IstStack = IstStack([0; IST_STACK_SIZE]);

fn stack_top(stack: *const IstStack) -> VirtualAddress {
    VirtualAddress::from_ptr(stack) + IST_STACK_SIZE as u64
}

/// Turns on `syscall` and the NX bit. Must run before any page table with
/// NX entries is loaded.
pub fn enable_features() {
    // SAFETY: CPL 0; both bits exist on every x86-64 CPU.
    unsafe {
        let efer = Efer::load_unsafe().with_sce(true).with_nxe(true);
        efer.store_unsafe();
    }
}

/// Builds the TSS and GDT and loads both.
///
/// # Safety
/// Call once, at CPL 0, with interrupts disabled. `kernel_stack_top` is the
/// stack ring-3 interrupts land on until the scheduler switches threads.
pub unsafe fn init(kernel_stack_top: VirtualAddress) {
    let per_cpu = &raw mut PER_CPU;
    unsafe {
        (*per_cpu).tss.set_ist(Ist::DoubleFault, stack_top(&raw const DOUBLE_FAULT_STACK));
        (*per_cpu).tss.set_ist(Ist::PageFault, stack_top(&raw const PAGE_FAULT_STACK));
        (*per_cpu).gdt = Gdt::with_tss(&(*per_cpu).tss);
        gdt::load(&(*per_cpu).gdt);
    }
    set_kernel_stack(kernel_stack_top);
    log::debug!("GDT and TSS loaded; IST1/IST2 ready");
}

/// Points ring-0 entry (interrupts via `TSS.rsp0`, `syscall` via the
/// per-CPU block) at `top`.
pub fn set_kernel_stack(top: VirtualAddress) {
    let per_cpu = &raw mut PER_CPU;
    // SAFETY: single CPU, interrupts are masked on every path that gets here.
    unsafe {
        (*per_cpu).tss.set_rsp0(top);
        (*per_cpu).syscall_stack_top = top.as_u64();
    }
}

#[must_use]
pub fn per_cpu_address() -> u64 {
    VirtualAddress::from_ptr(&raw const PER_CPU).as_u64()
}

/// Stops the CPU for good.
pub fn halt() -> ! {
    loop {
        // SAFETY: masks interrupts and waits; nothing is touched.
        unsafe { core::arch::asm!("cli", "hlt", options(nomem, nostack)) };
    }
}
