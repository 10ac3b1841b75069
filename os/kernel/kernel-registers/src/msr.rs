//! # `syscall` Model-Specific Registers
//!
//! `syscall` jumps to the address in `IA32_LSTAR`, loads kernel `CS`/`SS`
//! derived from `IA32_STAR[47:32]` and clears every RFLAGS bit that is set in
//! `IA32_FMASK`. It does **not** switch stacks; the entry stub does that.
//!
//! ## References
//! - Intel SDM Vol. 3, §5.8.8 "Fast System Calls in 64-Bit Mode"

mod ia32_star;

pub use ia32_star::Ia32Star;

use crate::rflags::Rflags;
use kernel_memory_addresses::VirtualAddress;

/// Identifies a **Model-Specific Register (MSR)** by its architectural index.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Msr(pub u32);

impl Msr {
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Writes `val` to this MSR.
    ///
    /// # Safety
    /// Executes `wrmsr`: CPL 0 only, and the MSR must exist and accept the
    /// value, otherwise the CPU raises `#GP(0)`.
    #[cfg(feature = "asm")]
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn store_raw(self, val: u64) {
        unsafe {
            core::arch::asm!(
                "wrmsr",
                in("ecx") self.0,
                in("eax") val as u32,
                in("edx") (val >> 32) as u32,
                options(nostack, preserves_flags)
            );
        }
    }

    /// Reads this MSR.
    ///
    /// # Safety
    /// Executes `rdmsr`: CPL 0 only, and the MSR must exist.
    #[cfg(feature = "asm")]
    #[inline]
    pub unsafe fn load_raw(self) -> u64 {
        let (lo, hi): (u32, u32);
        unsafe {
            core::arch::asm!(
                "rdmsr",
                in("ecx") self.0,
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
        (u64::from(hi) << 32) | u64::from(lo)
    }
}

/// `IA32_LSTAR`: 64-bit `syscall` target (MSR `0xC000_0082`).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ia32LStar(VirtualAddress);

impl Ia32LStar {
    pub const MSR: Msr = Msr::new(0xC000_0082);

    /// `entry` must be a canonical kernel address.
    #[must_use]
    pub const fn new(entry: VirtualAddress) -> Self {
        Self(entry)
    }

    #[must_use]
    pub const fn entry(self) -> VirtualAddress {
        self.0
    }
}

/// `IA32_FMASK`: RFLAGS bits cleared on `syscall` (MSR `0xC000_0084`).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ia32Fmask(u64);

impl Ia32Fmask {
    pub const MSR: Msr = Msr::new(0xC000_0084);

    /// Masks every flag set in `flags`. The fixed bit 1 is never masked.
    #[must_use]
    pub const fn new(flags: Rflags) -> Self {
        Self(flags.into_bits() & !0b10)
    }

    #[must_use]
    pub const fn into_bits(self) -> u64 {
        self.0
    }

    /// Applies the mask the way the CPU does on `syscall`.
    #[must_use]
    pub const fn apply(self, rflags: Rflags) -> Rflags {
        Rflags::from_bits(rflags.into_bits() & !self.0)
    }
}

macro_rules! msr_access {
    ($ty:ty, $load:expr, $store:expr) => {
        #[cfg(feature = "asm")]
        impl crate::LoadRegisterUnsafe for $ty {
            #[inline]
            unsafe fn load_unsafe() -> Self {
                let bits = unsafe { Self::MSR.load_raw() };
                $load(bits)
            }
        }

        #[cfg(feature = "asm")]
        impl crate::StoreRegisterUnsafe for $ty {
            #[inline]
            unsafe fn store_unsafe(self) {
                unsafe { Self::MSR.store_raw($store(self)) }
            }
        }
    };
}

msr_access!(
    Ia32LStar,
    |bits| Ia32LStar(VirtualAddress::new(bits)),
    |s: Ia32LStar| s.0.as_u64()
);
msr_access!(Ia32Fmask, Ia32Fmask, |s: Ia32Fmask| s.0);
msr_access!(Ia32Star, Ia32Star::from_bits, Ia32Star::into_bits);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmask_clears_interrupt_flag_only() {
        let mask = Ia32Fmask::new(Rflags::new().with_if_interrupt_enable(true));
        assert_eq!(mask.into_bits(), 0x200);
        let entered = mask.apply(Rflags::from_bits(0x246));
        assert_eq!(entered.into_bits(), 0x046);
    }
}
