//! # HHDM-based PhysMapper
//!
//! With a higher-half direct map every physical address `pa` is reachable at
//! `offset + pa`. The boot environment reports the offset in
//! `KernelBootInfo::physical_memory_offset`; the kernel trusts that value
//! over the compile-time default.
//!
//! ```rust
//! use kernel_alloc::phys_mapper::HhdmPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! let mapper = HhdmPhysMapper::new(0xffff_8880_0000_0000);
//! assert_eq!(mapper.virtual_of(PhysicalAddress::new(0x1000)).as_u64(), 0xffff_8880_0000_1000);
//! ```

use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for a kernel with all physical memory mapped at a fixed
/// offset.
///
/// # Safety
/// The direct map must be present and cover every physical address passed
/// to [`PhysMapper::phys_to_mut`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HhdmPhysMapper {
    offset: u64,
}

impl HhdmPhysMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Where `pa` appears in the direct map.
    #[must_use]
    pub const fn virtual_of(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(self.offset + pa.as_u64())
    }
}

impl Default for HhdmPhysMapper {
    fn default() -> Self {
        Self::new(HHDM_BASE)
    }
}

impl PhysMapper for HhdmPhysMapper {
    #[allow(unsafe_code)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = self.virtual_of(pa).as_mut_ptr::<T>();
        // SAFETY: the caller guarantees `pa` is covered by the direct map.
        unsafe { &mut *va }
    }
}
