//! # `syscall` entry
//!
//! `syscall` leaves RIP in RCX, RFLAGS in R11 and does not switch stacks.
//! The stub below parks the user RSP in the per-CPU block, moves onto the
//! current thread's kernel stack and pushes the same five-word frame an
//! interrupt would, plus a zero error code and [`SYSCALL_MARKER`] as the
//! vector. From there it shares the trap path, so a syscall may return
//! into a different thread and always leaves through `iretq`.
//!
//! ```text
//! RAX  syscall number       RDI, RSI, RDX, R10, R8, R9  arguments
//! RAX  result on return     RCX, R11                    clobbered
//! ```

use crate::cpu::{self, PerCpu};
use crate::traps::trap_common;
use core::mem::offset_of;
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::StoreRegisterUnsafe;
use kernel_registers::msr::{Ia32Fmask, Ia32LStar, Ia32Star, Msr};
use kernel_registers::rflags::Rflags;
use kernel_sched::context::SYSCALL_MARKER;
use kernel_sched::context::selectors::{KERNEL_CS, USER_CS, USER_DS};

const IA32_GS_BASE: Msr = Msr::new(0xC000_0101);
const IA32_KERNEL_GS_BASE: Msr = Msr::new(0xC000_0102);

/// Programs STAR, LSTAR and FMASK and points `KERNEL_GS_BASE` at the
/// per-CPU block. `EFER.SCE` is set by [`cpu::enable_features`].
///
/// # Safety
/// CPL 0, after [`cpu::init`].
pub unsafe fn init() {
    let entry = VirtualAddress::new(syscall_entry as usize as u64);
    unsafe {
        Ia32Star::for_selectors(KERNEL_CS, USER_CS).store_unsafe();
        Ia32LStar::new(entry).store_unsafe();
        Ia32Fmask::new(Rflags::new().with_if_interrupt_enable(true)).store_unsafe();
        IA32_GS_BASE.store_raw(0);
        IA32_KERNEL_GS_BASE.store_raw(cpu::per_cpu_address());
    }
    log::debug!("syscall entry at {entry}");
}

#[unsafe(naked)]
extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "swapgs",
        "mov gs:[{user_rsp}], rsp",
        "mov rsp, gs:[{stack_top}]",
        // Interrupt-shaped frame: SS, RSP, RFLAGS, CS, RIP.
        "push {user_ds}",
        "push qword ptr gs:[{user_rsp}]",
        "push r11",
        "push {user_cs}",
        "push rcx",
        "push 0",
        "push {marker}",
        "swapgs",
        "jmp {common}",
        user_rsp = const offset_of!(PerCpu, user_rsp),
        stack_top = const offset_of!(PerCpu, syscall_stack_top),
        user_ds = const USER_DS,
        user_cs = const USER_CS,
        marker = const SYSCALL_MARKER,
        common = sym trap_common,
    );
}
