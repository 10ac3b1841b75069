use bitfield_struct::bitfield;

/// `IA32_EFER` (MSR `0xC000_0080`).
///
/// Only the bits the kernel reads or writes are named; the rest are carried
/// through unchanged on read-modify-write.
#[bitfield(u64, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct Efer {
    /// Bit 0: SCE: enables `syscall`/`sysret`.
    pub sce: bool,

    /// Bits 1..=7.
    #[bits(7)]
    pub low_reserved: u8,

    /// Bit 8: LME: long mode enable.
    pub lme: bool,

    /// Bit 9.
    pub reserved9: bool,

    /// Bit 10: LMA: long mode active (read-only).
    pub lma: bool,

    /// Bit 11: NXE: honor the NX bit (63) of page-table entries.
    pub nxe: bool,

    /// Bits 12..=63.
    #[bits(52)]
    pub high_bits: u64,
}

impl Efer {
    /// MSR index for `IA32_EFER`.
    pub const MSR_EFER: u32 = 0xC000_0080;
}

#[cfg(feature = "asm")]
impl crate::LoadRegisterUnsafe for Efer {
    unsafe fn load_unsafe() -> Self {
        let (lo, hi): (u32, u32);
        unsafe {
            core::arch::asm!(
                "rdmsr",
                in("ecx") Self::MSR_EFER,
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
        Self::from_bits((u64::from(hi) << 32) | u64::from(lo))
    }
}

#[cfg(feature = "asm")]
impl crate::StoreRegisterUnsafe for Efer {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn store_unsafe(self) {
        let bits = self.into_bits();
        unsafe {
            core::arch::asm!(
                "wrmsr",
                in("ecx") Self::MSR_EFER,
                in("eax") bits as u32,
                in("edx") (bits >> 32) as u32,
                options(nostack, preserves_flags)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabling_syscall_and_nx_keeps_other_bits() {
        // LME | LMA as seen after the boot loader entered long mode.
        let efer = Efer::from_bits(0x500).with_sce(true).with_nxe(true);
        assert_eq!(efer.into_bits(), 0xD01);
        assert!(efer.lme() && efer.lma());
    }
}
