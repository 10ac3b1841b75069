use kernel_memory_addresses::VirtualAddress;

/// CR2: Page-Fault Linear Address.
///
/// The CPU writes the faulting linear address here before delivering `#PF`.
/// It must be read before anything else can fault again.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Cr2(u64);

impl Cr2 {
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn into_bits(self) -> u64 {
        self.0
    }

    /// The address whose access faulted.
    #[must_use]
    pub const fn fault_address(self) -> VirtualAddress {
        VirtualAddress::new(self.0)
    }
}

#[cfg(feature = "asm")]
impl crate::LoadRegisterUnsafe for Cr2 {
    #[inline]
    unsafe fn load_unsafe() -> Self {
        let cr2: u64;
        unsafe {
            core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
        }
        Self(cr2)
    }
}
