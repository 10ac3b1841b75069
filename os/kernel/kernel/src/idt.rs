//! # Interrupt Descriptor Table
//!
//! Every gate the kernel installs is an interrupt gate (IF cleared on entry)
//! in the kernel code segment. Gates differ only in DPL, so `int3` works from
//! ring 3, and in the IST slot, so double and page faults get a known-good
//! stack.

use bitfield_struct::bitfield;
use kernel_sched::context::selectors::KERNEL_CS;

const _: () = assert!(size_of::<IdtEntry>() == 16);
const _: () = assert!(align_of::<Idt>() == 16);

/// Middle two bytes of a gate: IST index, then `P | DPL | S | Type`.
#[bitfield(u16)]
pub struct IdtGateAttr {
    #[bits(3)]
    pub ist: u8,
    #[bits(5)]
    __zero: u8,
    #[bits(4)]
    pub typ: u8,
    pub s: bool,
    #[bits(2)]
    pub dpl: u8,
    pub present: bool,
}

impl IdtGateAttr {
    const INTERRUPT_GATE: u8 = 0xE;

    #[must_use]
    pub const fn interrupt_gate() -> Self {
        Self::new().with_typ(Self::INTERRUPT_GATE).with_present(true)
    }
}

#[repr(C)]
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdtEntry {
    offset_lo: u16,
    selector: u16,
    attr: u16,
    offset_mid: u16,
    offset_hi: u32,
    _reserved: u32,
}

impl IdtEntry {
    pub const MISSING: Self = Self {
        offset_lo: 0,
        selector: 0,
        attr: 0,
        offset_mid: 0,
        offset_hi: 0,
        _reserved: 0,
    };

    #[allow(clippy::cast_possible_truncation)]
    const fn new(handler: u64, attr: IdtGateAttr) -> Self {
        Self {
            offset_lo: handler as u16,
            selector: KERNEL_CS,
            attr: attr.into_bits(),
            offset_mid: (handler >> 16) as u16,
            offset_hi: (handler >> 32) as u32,
            _reserved: 0,
        }
    }

    /// Reachable from ring `dpl` via `int n`.
    pub const fn dpl(&mut self, dpl: u8) -> &mut Self {
        self.attr = IdtGateAttr::from_bits(self.attr).with_dpl(dpl & 0b11).into_bits();
        self
    }

    pub const fn ist(&mut self, index: u8) -> &mut Self {
        self.attr = IdtGateAttr::from_bits(self.attr).with_ist(index & 0b111).into_bits();
        self
    }

    #[cfg(test)]
    pub const fn attr(&self) -> IdtGateAttr {
        IdtGateAttr::from_bits(self.attr)
    }

    #[cfg(test)]
    pub fn handler(&self) -> u64 {
        u64::from(self.offset_lo) | u64::from(self.offset_mid) << 16 | u64::from(self.offset_hi) << 32
    }
}

#[repr(C, align(16))]
pub struct Idt {
    entries: [IdtEntry; 256],
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

impl Idt {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::MISSING; 256],
        }
    }

    /// Installs a kernel-only interrupt gate for `vector` and returns it for
    /// further adjustment.
    pub fn gate(&mut self, vector: u8, handler: extern "C" fn()) -> &mut IdtEntry {
        let entry = &mut self.entries[usize::from(vector)];
        *entry = IdtEntry::new(handler as usize as u64, IdtGateAttr::interrupt_gate());
        entry
    }

    #[cfg(test)]
    pub fn entry(&self, vector: u8) -> &IdtEntry {
        &self.entries[usize::from(vector)]
    }

    /// # Safety
    /// Every present gate must point at a valid entry stub, and the GDT and
    /// TSS they rely on must already be loaded.
    #[cfg(target_os = "none")]
    pub unsafe fn load(&'static self) {
        #[repr(C, packed)]
        #[allow(dead_code)]
        struct Idtr {
            limit: u16,
            base: u64,
        }

        #[allow(clippy::cast_possible_truncation)]
        let idtr = Idtr {
            limit: (size_of::<Self>() - 1) as u16,
            base: core::ptr::from_ref(self) as u64,
        };
        unsafe {
            core::arch::asm!("lidt [{}]", in(reg) &raw const idtr, options(readonly, nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn stub() {}

    #[test]
    fn gate_attributes() {
        let mut idt = Idt::new();
        idt.gate(3, stub).dpl(3);
        idt.gate(14, stub).ist(2);
        idt.gate(32, stub);

        assert_eq!(idt.entry(3).attr().into_bits(), 0xEE00);
        assert_eq!(idt.entry(14).attr().into_bits(), 0x8E02);
        assert_eq!(idt.entry(32).attr().into_bits(), 0x8E00);
        assert_eq!(*idt.entry(33), IdtEntry::MISSING);
    }

    #[test]
    fn handler_address_reassembles() {
        let mut idt = Idt::new();
        idt.gate(0xFF, stub);

        let entry = idt.entry(0xFF);
        assert_eq!(entry.handler(), stub as usize as u64);
        assert_eq!(entry.selector, KERNEL_CS);
        assert!(entry.attr().present());
        assert_eq!(entry.attr().ist(), 0);
    }
}
