use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// CR3: root of the active paging hierarchy (PCID disabled).
///
/// Writing CR3 switches the address space and flushes every non-global TLB
/// entry. The scheduler writes it whenever the next thread belongs to a
/// different process than the current one.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct Cr3 {
    /// Bits 0..=2: Reserved.
    #[bits(3)]
    __: u8,

    /// Bit 3: PWT: write-through for PML4 accesses.
    pub pwt: bool,

    /// Bit 4: PCD: cache disable for PML4 accesses.
    pub pcd: bool,

    /// Bits 5..=11: Reserved.
    #[bits(7)]
    __: u8,

    /// Bits 12..=51: PML4 frame number.
    #[bits(40)]
    pml4_frame: u64,

    /// Bits 52..=63: Reserved.
    #[bits(12)]
    __: u16,
}

impl Cr3 {
    /// CR3 value selecting the PML4 at `pml4`, with default caching.
    ///
    /// `pml4` must be 4 KiB aligned.
    #[must_use]
    pub const fn from_pml4(pml4: PhysicalAddress) -> Self {
        debug_assert!(pml4.as_u64() & 0xFFF == 0, "PML4 base must be 4K-aligned");
        Self::new().with_pml4_frame(pml4.frame_index())
    }

    /// Physical base of the PML4.
    #[must_use]
    pub const fn pml4(&self) -> PhysicalAddress {
        PhysicalAddress::from_frame_index(self.pml4_frame())
    }
}

#[cfg(feature = "asm")]
impl crate::LoadRegisterUnsafe for Cr3 {
    #[inline]
    unsafe fn load_unsafe() -> Self {
        let cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(feature = "asm")]
impl crate::StoreRegisterUnsafe for Cr3 {
    #[inline]
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pml4_round_trips_through_frame_field() {
        let cr3 = Cr3::from_pml4(PhysicalAddress::new(0x0012_3000));
        assert_eq!(cr3.into_bits(), 0x0012_3000);
        assert_eq!(cr3.pml4(), PhysicalAddress::new(0x0012_3000));
        assert!(!cr3.pwt() && !cr3.pcd());
    }

    #[test]
    fn cache_bits_do_not_leak_into_base() {
        let cr3 = Cr3::from_bits(0x0000_0000_0040_0018);
        assert!(cr3.pwt());
        assert!(cr3.pcd());
        assert_eq!(cr3.pml4().as_u64(), 0x40_0000);
    }
}
