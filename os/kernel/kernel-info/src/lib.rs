//! # Kernel Configuration and Boot Interface
//!
//! This crate holds the data the kernel receives from the boot environment
//! and the configuration that shapes its memory management:
//!
//! * [`boot`]: the `#[repr(C)]` boot-info handoff structure (framebuffer,
//!   physical memory map, direct-map window, kernel image, initial PML4,
//!   ACPI root, ramdisk and the raw argument string).
//! * [`memory`]: compile-time layout constants and capacity limits
//!   (address-space split, user stack placement, process and thread table
//!   sizes, region pool sizing).
//! * [`params`]: the parser for the kernel argument string
//!   (`NoASLR`, `InitProcess=...`, `LogLevel=...`).
//!
//! ## Virtual Memory Layout
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │ page 0 (never mapped)           │
//! 0x0000_0000_0000_1000 ├─────────────────────────────────┤
//!                       │ user space (per-process VM      │
//!                       │ allocator, ASLR)                │
//!        USER_STACK_TOP ├─────────────────────────────────┤ 0x0000_7fff_ffff_f000
//! 0x0000_8000_0000_0000 ├─────────────────────────────────┤
//!                       │ non-canonical hole              │
//! 0xffff_8000_0000_0000 ├─────────────────────────────────┤
//!                       │ direct map of physical memory   │
//!                       │ (offset from boot info)         │
//!   KERNEL_WINDOW_START ├─────────────────────────────────┤ 0xffff_ff00_0000_0000
//!                       │ kernel VM allocator window,     │
//!                       │ kernel image at KERNEL_BASE     │
//! 0xffff_ffff_ffff_f000 └─────────────────────────────────┘
//! ```
//!
//! The kernel window spans the top [`memory::KERNEL_PML4_ENTRIES`] PML4
//! slots. Those slots are created once at boot and copied into every process
//! PML4, so everything the kernel maps there later is visible in all address
//! spaces.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod params;
