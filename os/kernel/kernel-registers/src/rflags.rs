use bitfield_struct::bitfield;

/// Architectural RFLAGS model for x86-64.
///
/// Only the bits a kernel sets up for new threads or masks on `syscall`
/// entry are named individually.
#[bitfield(u64, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct Rflags {
    /// Carry Flag
    pub cf_carry: bool, // 0

    /// Always 1.
    #[bits(default = true)]
    pub fixed_one: bool, // 1

    /// Arithmetic status bits PF, AF, ZF, SF and their reserved neighbors.
    #[bits(6)]
    pub status: u8, // 2..=7

    /// Trap Flag
    pub tf_trap: bool, // 8

    /// Interrupt Enable Flag
    pub if_interrupt_enable: bool, // 9

    /// Direction Flag
    pub df_direction: bool, // 10

    /// Overflow Flag
    pub of_overflow: bool, // 11

    /// I/O Privilege Level
    #[bits(2)]
    pub iopl: u8, // 12..=13

    /// Nested Task
    pub nt_nested: bool, // 14

    #[bits(3)]
    pub reserved15: u8, // 15..=17

    /// Alignment Check
    pub ac_alignment_check: bool, // 18

    #[bits(45)]
    pub upper: u64, // 19..=63
}

impl Rflags {
    /// Flags a new user thread starts with: interrupts enabled, the fixed
    /// bit set, everything else clear (`0x202`).
    #[must_use]
    pub const fn user_default() -> Self {
        Self::new().with_if_interrupt_enable(true)
    }
}

#[cfg(feature = "asm")]
impl crate::LoadRegister for Rflags {
    #[inline]
    fn load() -> Self {
        let bits: u64;
        unsafe {
            core::arch::asm!("pushfq", "pop {}", out(reg) bits, options(nomem, preserves_flags));
        }
        Self::from_bits(bits)
    }
}
