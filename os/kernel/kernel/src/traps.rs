//! # Trap entry and exit
//!
//! Each vector the kernel handles has a tiny naked stub that makes the
//! stack uniform (a zero error code where the CPU pushes none, then the
//! vector number) and jumps to [`trap_common`]. That routine completes a
//! [`CpuContext`] on the stack:
//!
//! ```text
//!  high  ┌──────────────────────────┐
//!        │ SS RSP RFLAGS CS RIP     │ CPU (or the syscall stub)
//!        │ error code               │ CPU or stub
//!        │ vector                   │ stub
//!        │ r15 … r8 rbp rdi rsi     │
//!        │ rdx rcx rbx rax          │ trap_common
//!  low   │ cr3                      │ ◄── &mut CpuContext
//!        └──────────────────────────┘
//! ```
//!
//! and calls [`dispatch`]. On return the context may describe a different
//! thread; `trap_common` loads its CR3 if it differs, pops the registers
//! and leaves with `iretq`. Kernel stacks live in the shared kernel half,
//! so the stack stays valid across the CR3 write.

use crate::apic::{self, SPURIOUS_VECTOR, TIMER_VECTOR};
use crate::boot::KERNEL;
use crate::cpu;
use crate::idt::Idt;
use crate::tss::Ist;
use kernel_qemu::{Sink, qemu_trace};
use kernel_registers::LoadRegisterUnsafe;
use kernel_registers::cr2::Cr2;
use kernel_sched::context::SYSCALL_MARKER;
use kernel_sched::trap::Exception;
use kernel_sched::{CpuContext, TrapOutcome, handle_exception};
use kernel_syscall::SyscallHost;

macro_rules! trap_stub {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        extern "C" fn $name() {
            core::arch::naked_asm!(
                "push 0",
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym trap_common,
            );
        }
    };
    ($name:ident, $vector:expr, error_code) => {
        #[unsafe(naked)]
        extern "C" fn $name() {
            core::arch::naked_asm!(
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym trap_common,
            );
        }
    };
}

trap_stub!(breakpoint, Exception::Breakpoint as u8);
trap_stub!(invalid_opcode, Exception::InvalidOpcode as u8);
trap_stub!(double_fault, Exception::DoubleFault as u8, error_code);
trap_stub!(general_protection, Exception::GeneralProtection as u8, error_code);
trap_stub!(page_fault, Exception::PageFault as u8, error_code);
trap_stub!(timer, TIMER_VECTOR);
trap_stub!(spurious, SPURIOUS_VECTOR);

static mut IDT: Idt = Idt::new();

/// Installs every gate and loads the IDT.
///
/// # Safety
/// CPL 0, after [`cpu::init`] so the IST slots exist.
pub unsafe fn init() {
    let idt = &raw mut IDT;
    unsafe {
        (*idt).gate(Exception::Breakpoint as u8, breakpoint).dpl(3);
        (*idt).gate(Exception::InvalidOpcode as u8, invalid_opcode);
        (*idt)
            .gate(Exception::DoubleFault as u8, double_fault)
            .ist(Ist::DoubleFault.gate_index());
        (*idt).gate(Exception::GeneralProtection as u8, general_protection);
        (*idt)
            .gate(Exception::PageFault as u8, page_fault)
            .ist(Ist::PageFault.gate_index());
        (*idt).gate(TIMER_VECTOR, timer);
        (*idt).gate(SPURIOUS_VECTOR, spurious);
        (*idt).load();
    }
    log::debug!("IDT loaded");
}

#[unsafe(naked)]
pub(crate) extern "C" fn trap_common() {
    core::arch::naked_asm!(
        "push r15", "push r14", "push r13", "push r12",
        "push r11", "push r10", "push r9", "push r8",
        "push rbp", "push rdi", "push rsi", "push rdx",
        "push rcx", "push rbx", "push rax",
        "mov rax, cr3",
        "push rax",
        "cld",

        // rbx is callee-saved, so it survives the call.
        "mov rdi, rsp",
        "mov rbx, rsp",
        "and rsp, -16",
        "call {dispatch}",
        "mov rsp, rbx",

        "pop rax",
        "mov rbx, cr3",
        "cmp rax, rbx",
        "je 2f",
        "mov cr3, rax",
        "2:",
        "pop rax", "pop rbx", "pop rcx", "pop rdx",
        "pop rsi", "pop rdi", "pop rbp",
        "pop r8", "pop r9", "pop r10", "pop r11",
        "pop r12", "pop r13", "pop r14", "pop r15",
        // vector and error code
        "add rsp, 16",
        "iretq",
        dispatch = sym dispatch,
    );
}

/// Routes `DebugWrite` bytes to the QEMU debug console.
struct DebugConsole;

impl SyscallHost for DebugConsole {
    fn debug_write(&mut self, byte: u8) {
        Sink::DebugCon.write_byte(byte);
    }
}

extern "C" fn dispatch(saved: &mut CpuContext) {
    let cr2 = if saved.vector == Exception::PageFault as u64 {
        // SAFETY: CPL 0; read before anything can fault again.
        unsafe { Cr2::load_unsafe() }.into_bits()
    } else {
        0
    };

    let outcome = KERNEL.with(|kernel| {
        let Some(kernel) = kernel.as_mut() else {
            return TrapOutcome::Halt;
        };
        let kernel = &mut kernel.0;
        match saved.vector {
            SYSCALL_MARKER => switched(kernel.handle_syscall(saved, &mut DebugConsole)),
            v if v == u64::from(TIMER_VECTOR) => {
                apic::eoi();
                switched(kernel.schedule(saved))
            }
            v if v == u64::from(SPURIOUS_VECTOR) => TrapOutcome::Resume,
            _ => handle_exception(kernel, saved, cr2),
        }
    });

    match outcome {
        Ok(TrapOutcome::Resume) => {}
        Ok(TrapOutcome::Switched(top)) => cpu::set_kernel_stack(top),
        Ok(TrapOutcome::Halt) => {
            qemu_trace!("halting after vector {:#x} at rip {:#x}\n", saved.vector, saved.frame.rip);
            cpu::halt()
        }
        Err(e) => {
            qemu_trace!("vector {:#x} at rip {:#x}: {e}\n", saved.vector, saved.frame.rip);
            cpu::halt()
        }
    }
}

fn switched(top: Option<kernel_memory_addresses::VirtualAddress>) -> TrapOutcome {
    top.map_or(TrapOutcome::Resume, TrapOutcome::Switched)
}
