//! # Global Descriptor Table
//!
//! Long mode ignores base and limit for code and data segments, so the only
//! bits that matter are type, S, DPL, P and L. The TSS descriptor is the
//! exception: it is a 16-byte system descriptor carrying a full 64-bit base.
//!
//! Layout (matches [`kernel_sched::context::selectors`]):
//!
//! | Index | Selector | Entry |
//! |-------|----------|-------|
//! | 0 | none | null |
//! | 1 | `0x08` | kernel code |
//! | 2 | `0x10` | kernel data |
//! | 3 | `0x1b` | user data |
//! | 4 | `0x23` | user code |
//! | 5, 6 | `0x28` | TSS (two slots) |
//!
//! User data sits below user code because `sysret` derives SS from
//! `STAR[63:48] + 8` and CS from `STAR[63:48] + 16`.

use crate::tss::Tss64;
use bitfield_struct::bitfield;

#[bitfield(u64)]
pub struct SegmentDescriptor {
    pub limit_lo: u16, // [15:0]
    pub base_lo: u16,  // [31:16]
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40]
    pub s: bool, // [44] code/data
    #[bits(2)]
    pub dpl: u8, // [46:45]
    pub present: bool, // [47]
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,     // [52]
    pub long: bool,    // [53]
    pub db: bool,      // [54]
    pub granularity: bool, // [55]
    pub base_hi: u8,   // [63:56]
}

impl SegmentDescriptor {
    const TYPE_CODE_EXEC_READ: u8 = 0b1010;
    const TYPE_DATA_READ_WRITE: u8 = 0b0010;
    const TYPE_TSS_AVAILABLE: u8 = 0b1001;

    /// 64-bit code segment (`L=1`, `DB=0`).
    #[must_use]
    pub const fn code(dpl: u8) -> Self {
        Self::new()
            .with_typ(Self::TYPE_CODE_EXEC_READ)
            .with_s(true)
            .with_dpl(dpl & 0b11)
            .with_present(true)
            .with_long(true)
    }

    #[must_use]
    pub const fn data(dpl: u8) -> Self {
        Self::new()
            .with_typ(Self::TYPE_DATA_READ_WRITE)
            .with_s(true)
            .with_dpl(dpl & 0b11)
            .with_present(true)
    }

    /// The two slots of an available 64-bit TSS descriptor.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn tss(base: u64, limit: u32) -> [Self; 2] {
        let low = Self::new()
            .with_limit_lo(limit as u16)
            .with_base_lo(base as u16)
            .with_base_mid((base >> 16) as u8)
            .with_typ(Self::TYPE_TSS_AVAILABLE)
            .with_present(true)
            .with_limit_hi(((limit >> 16) & 0xF) as u8)
            .with_base_hi((base >> 24) as u8);
        let high = Self::from_bits(base >> 32);
        [low, high]
    }
}

#[repr(C, align(16))]
pub struct Gdt {
    entries: [SegmentDescriptor; 7],
}

impl Gdt {
    pub const EMPTY: Self = Self {
        entries: [SegmentDescriptor::new(); 7],
    };

    #[must_use]
    pub fn with_tss(tss: &Tss64) -> Self {
        let [tss_lo, tss_hi] =
            SegmentDescriptor::tss(core::ptr::from_ref(tss) as u64, Tss64::limit());
        Self {
            entries: [
                SegmentDescriptor::new(),
                SegmentDescriptor::code(0),
                SegmentDescriptor::data(0),
                SegmentDescriptor::data(3),
                SegmentDescriptor::code(3),
                tss_lo,
                tss_hi,
            ],
        }
    }

    /// Entry addressed by a selector, RPL bits ignored.
    #[cfg(test)]
    fn entry(&self, selector: u16) -> SegmentDescriptor {
        self.entries[usize::from(selector >> 3)]
    }
}

#[repr(C, packed)]
#[cfg(target_os = "none")]
#[allow(dead_code)]
struct DescriptorTablePointer {
    limit: u16,
    base: u64,
}

/// Loads the GDT, reloads every segment register and loads the task register.
///
/// # Safety
/// `gdt` must contain the layout above with a valid TSS descriptor, and the
/// TSS it points to must live for as long as the GDT is loaded.
#[cfg(target_os = "none")]
pub unsafe fn load(gdt: &'static Gdt) {
    use core::arch::asm;
    use kernel_sched::context::selectors::{KERNEL_CS, KERNEL_DS, TSS};

    #[allow(clippy::cast_possible_truncation)]
    let pointer = DescriptorTablePointer {
        limit: (size_of::<Gdt>() - 1) as u16,
        base: core::ptr::from_ref(gdt) as u64,
    };

    unsafe {
        asm!("lgdt [{}]", in(reg) &raw const pointer, options(readonly, nostack, preserves_flags));
        asm!(
            "mov ds, {sel:x}",
            "mov es, {sel:x}",
            "mov ss, {sel:x}",
            "xor {zero:e}, {zero:e}",
            "mov fs, {zero:x}",
            "mov gs, {zero:x}",
            sel = in(reg) KERNEL_DS,
            zero = out(reg) _,
            options(nostack, preserves_flags),
        );
        // Far return into the new code segment.
        asm!(
            "push {cs}",
            "lea rax, [rip + 2f]",
            "push rax",
            "retfq",
            "2:",
            cs = in(reg) u64::from(KERNEL_CS),
            out("rax") _,
            options(preserves_flags),
        );
        asm!("ltr {0:x}", in(reg) TSS, options(nostack, preserves_flags));
    }
}
