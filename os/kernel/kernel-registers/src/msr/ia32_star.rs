use super::Msr;
use bitfield_struct::bitfield;

/// `IA32_STAR`: `syscall`/`sysret` segment bases (MSR `0xC000_0081`).
///
/// ```text
/// syscall: CS = STAR[47:32]          SS = STAR[47:32] + 8
/// sysret:  CS = (STAR[63:48] + 16)|3 SS = (STAR[63:48] + 8)|3
/// ```
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct Ia32Star {
    /// Bits 0..=31: legacy-mode `syscall` EIP, unused in long mode.
    #[bits(32)]
    __: u32,

    /// Bits 32..=47: kernel `CS` loaded by `syscall`.
    #[bits(16)]
    pub syscall_cs: u16,

    /// Bits 48..=63: base from which `sysret` derives user `CS` and `SS`.
    #[bits(16)]
    pub sysret_base: u16,
}

impl Ia32Star {
    pub const MSR: Msr = Msr::new(0xC000_0081);

    /// STAR for a GDT laid out as kernel code, kernel data, user data,
    /// user code.
    ///
    /// `kernel_cs` must be a ring-0 selector and `kernel_cs + 8` its data
    /// segment. `user_cs` is the ring-3 code selector (e.g. `0x23`).
    #[must_use]
    pub const fn for_selectors(kernel_cs: u16, user_cs: u16) -> Self {
        debug_assert!(kernel_cs & 0b11 == 0, "kernel CS must be ring 0");
        debug_assert!(user_cs >> 3 >= 2, "user CS needs a data segment below it");
        // sysret adds 16 to reach CS, the data segment sits one slot below CS.
        let base = ((user_cs >> 3) - 2) << 3;
        Self::new().with_syscall_cs(kernel_cs).with_sysret_base(base)
    }
}
