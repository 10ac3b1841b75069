//! # Typed `x86_64` Registers
//!
//! Bit-level models of the control registers and MSRs the kernel touches
//! while handling faults, switching address spaces and configuring the
//! `syscall` entry path.
//!
//! | Register | Used for |
//! |----------|----------|
//! | [`Cr2`](cr2::Cr2) | Faulting address of the last `#PF` |
//! | [`Cr3`](cr3::Cr3) | Active PML4; written on every address-space switch |
//! | [`Efer`](efer::Efer) | `SCE` (enables `syscall`) and `NXE` (enables the NX bit) |
//! | [`Ia32Star`](msr::Ia32Star), [`Ia32LStar`](msr::Ia32LStar), [`Ia32Fmask`](msr::Ia32Fmask) | `syscall` selectors, target and flag mask |
//! | [`Rflags`](rflags::Rflags) | Initial flags of new threads, interrupt state |
//!
//! The bit layouts are plain data and compile on any host. The instructions
//! that move them in and out of the CPU are gated behind the `asm` feature.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr2")]
pub mod cr2;

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "efer")]
pub mod efer;

#[cfg(feature = "msr")]
pub mod msr;

#[cfg(feature = "rflags")]
pub mod rflags;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// Writing control registers can change the active address space or
    /// disable interrupts for the rest of the system.
    unsafe fn store_unsafe(self);
}

pub trait LoadRegister {
    /// Loads the register. Safe because reading it has no side effects.
    fn load() -> Self;
}

pub trait StoreRegister {
    /// Stores the register. Safe because it is valid at any privilege level.
    fn store(self);
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}

impl<T> StoreRegisterUnsafe for T
where
    T: StoreRegister,
{
    #[inline]
    unsafe fn store_unsafe(self) {
        <Self as StoreRegister>::store(self);
    }
}
