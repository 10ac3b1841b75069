//! TLB invalidation boundary.
//!
//! Changing a present entry (unmap, remap) must be followed by an
//! invalidation; installing a new mapping over a zero entry needs none.

use kernel_memory_addresses::VirtualAddress;

pub trait Tlb {
    /// Drops the cached translation for the page containing `va`.
    fn flush_page(&self, va: VirtualAddress);

    /// Drops all non-global cached translations.
    fn flush_all(&self);
}

/// Executes `invlpg` and CR3 reloads on the current CPU.
#[derive(Debug, Default, Copy, Clone)]
pub struct HardwareTlb;

#[cfg(target_arch = "x86_64")]
impl Tlb for HardwareTlb {
    #[inline]
    fn flush_page(&self, va: VirtualAddress) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
        }
    }

    fn flush_all(&self) {
        use kernel_registers::cr3::Cr3;
        use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
        unsafe {
            Cr3::load_unsafe().store_unsafe();
        }
    }
}

/// For page tables that are not active on any CPU.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoopTlb;

impl Tlb for NoopTlb {
    fn flush_page(&self, _va: VirtualAddress) {}
    fn flush_all(&self) {}
}
