//! # Kernel Entry Point
//!
//! The bootable image. It owns everything that needs privileged
//! instructions and hands the rest to the library crates:
//!
//! | Module | Role |
//! |--------|------|
//! | `boot` | loader entry, bring-up order, built-in programs, idle loop |
//! | `cpu` | per-CPU block (GDT, TSS, `syscall` scratch), IST stacks |
//! | `gdt`, `tss` | descriptor encodings |
//! | `idt` | gate encodings and `lidt` |
//! | `traps` | exception and IRQ stubs, the common save/restore path |
//! | `syscall` | `syscall` MSRs and entry stub |
//! | `apic`, `pic` | local APIC timer, legacy PIC shutdown |
//! | `entropy` | boot-time seed for the placement RNG |
//!
//! Every entry into the kernel (exception, timer, `syscall`) builds one
//! [`CpuContext`](kernel_sched::CpuContext) on the stack and calls a single
//! Rust dispatcher. The dispatcher may replace that context with another
//! thread's; the common exit path then restores whatever it finds, including
//! CR3, and returns with `iretq`.
//!
//! Off target only the descriptor encodings are compiled, so their tests run
//! on the host.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![cfg_attr(not(target_os = "none"), allow(dead_code))]
#![allow(unsafe_code)]

mod gdt;
mod idt;
mod pic;
mod tss;

#[cfg(target_os = "none")]
mod apic;
#[cfg(target_os = "none")]
mod boot;
#[cfg(target_os = "none")]
mod cpu;
#[cfg(target_os = "none")]
mod entropy;
#[cfg(target_os = "none")]
mod syscall;
#[cfg(target_os = "none")]
mod traps;

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    // The logger may be what panicked; write straight to the port.
    kernel_qemu::qemu_trace!("kernel panic: {info}\n");
    cpu::halt()
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("The kernel only runs on bare metal; build it for x86_64-unknown-none.");
}
