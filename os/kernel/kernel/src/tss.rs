//! # 64-bit Task State Segment
//!
//! Long mode does no hardware task switching, but the CPU still reads two
//! things from the TSS:
//!
//! - `rsp0`, the stack loaded when an interrupt moves from ring 3 to ring 0.
//!   The scheduler points it at the kernel stack of whichever thread it just
//!   loaded.
//! - `ist1..ist7`, stacks selected by an IDT gate's IST index regardless of
//!   privilege. Double faults use IST1 and page faults IST2, so both still
//!   have a usable stack when the current one is the problem.
//!
//! `syscall` does not consult the TSS; its stack comes from the per-CPU
//! block.

use core::mem::size_of;
use kernel_memory_addresses::VirtualAddress;

/// IST slots used by the kernel's gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ist {
    DoubleFault = 1,
    PageFault = 2,
}

impl Ist {
    /// Value for the gate's IST field.
    #[must_use]
    pub const fn gate_index(self) -> u8 {
        self as u8
    }
}

/// Architectural layout; the CPU finds it through the task register.
#[allow(dead_code)]
#[repr(C, packed)]
pub struct Tss64 {
    _reserved0: u32,
    /// `rsp0..rsp2`, loaded on a change to that privilege level.
    privilege_stacks: [VirtualAddress; 3],
    _reserved1: u64,
    /// `ist1..ist7`; slot `n` is at index `n - 1`.
    interrupt_stacks: [VirtualAddress; 7],
    _reserved2: u64,
    _reserved3: u16,
    /// At or past the limit: no I/O bitmap, so ring 3 has no port access.
    iopb_offset: u16,
}

const _: () = assert!(size_of::<Tss64>() == 104);

impl Default for Tss64 {
    fn default() -> Self {
        Self::new()
    }
}

impl Tss64 {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new() -> Self {
        Self {
            _reserved0: 0,
            privilege_stacks: [VirtualAddress::zero(); 3],
            _reserved1: 0,
            interrupt_stacks: [VirtualAddress::zero(); 7],
            _reserved2: 0,
            _reserved3: 0,
            iopb_offset: size_of::<Self>() as u16,
        }
    }

    /// Stack for interrupts arriving from ring 3.
    pub const fn set_rsp0(&mut self, top: VirtualAddress) {
        let mut stacks = self.privilege_stacks;
        stacks[0] = top;
        self.privilege_stacks = stacks;
    }

    pub const fn set_ist(&mut self, slot: Ist, top: VirtualAddress) {
        let index = match slot {
            Ist::DoubleFault => 0,
            Ist::PageFault => 1,
        };
        let mut stacks = self.interrupt_stacks;
        stacks[index] = top;
        self.interrupt_stacks = stacks;
    }

    /// Descriptor limit: size minus one.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn limit() -> u32 {
        (size_of::<Self>() - 1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    #[test]
    fn architectural_layout() {
        assert_eq!(offset_of!(Tss64, privilege_stacks), 0x04);
        assert_eq!(offset_of!(Tss64, interrupt_stacks), 0x24);
        assert_eq!(offset_of!(Tss64, iopb_offset), 0x66);
        assert_eq!(Tss64::limit(), 0x67);
    }

    #[test]
    fn io_bitmap_is_disabled_and_stacks_land_in_their_slots() {
        let mut tss = Tss64::new();
        let iopb = tss.iopb_offset;
        assert_eq!(iopb, 104);

        tss.set_rsp0(VirtualAddress::new(0xffff_ff00_0001_0000));
        tss.set_ist(Ist::PageFault, VirtualAddress::new(0xffff_ff00_0000_4000));

        let (rsp, ist) = (tss.privilege_stacks, tss.interrupt_stacks);
        assert_eq!(rsp[0].as_u64(), 0xffff_ff00_0001_0000);
        assert_eq!(ist[0], VirtualAddress::zero());
        assert_eq!(ist[1].as_u64(), 0xffff_ff00_0000_4000);
        assert_eq!(Ist::PageFault.gate_index(), 2);
    }
}
