//! # Local APIC in `xAPIC` mode
//!
//! The register page is found through `IA32_APIC_BASE`, mapped uncached into
//! the kernel window, and then only ever touched with 32-bit volatile
//! accesses. The timer runs periodically at [`TIMER_VECTOR`]; the spurious
//! vector is [`SPURIOUS_VECTOR`] and needs no EOI.

use core::sync::atomic::{AtomicU64, Ordering};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_registers::msr::Msr;

pub const TIMER_VECTOR: u8 = 32;
pub const SPURIOUS_VECTOR: u8 = 0xFF;

/// Initial count at divide-by-16; roughly 10 ms on QEMU's 1 GHz APIC clock.
const TIMER_INITIAL_COUNT: u32 = 625_000;

const IA32_APIC_BASE: Msr = Msr::new(0x1B);
const APIC_GLOBAL_ENABLE: u64 = 1 << 11;
const APIC_BASE_MASK: u64 = 0x000F_FFFF_FFFF_F000;

const REG_TPR: u64 = 0x80;
const REG_EOI: u64 = 0xB0;
const REG_SVR: u64 = 0xF0;
const REG_LVT_TIMER: u64 = 0x320;
const REG_TIMER_INITIAL: u64 = 0x380;
const REG_TIMER_DIVIDE: u64 = 0x3E0;

const SVR_SOFTWARE_ENABLE: u32 = 1 << 8;
const LVT_PERIODIC: u32 = 1 << 17;
const DIVIDE_BY_16: u32 = 0b0011;

/// Virtual base of the register page; zero until [`LocalApic::enable`].
static BASE: AtomicU64 = AtomicU64::new(0);

pub struct LocalApic;

impl LocalApic {
    /// Physical register page, with the global enable bit forced on.
    ///
    /// # Safety
    /// CPL 0.
    #[must_use]
    pub unsafe fn physical_base() -> PhysicalAddress {
        let raw = unsafe { IA32_APIC_BASE.load_raw() };
        if raw & APIC_GLOBAL_ENABLE == 0 {
            unsafe { IA32_APIC_BASE.store_raw(raw | APIC_GLOBAL_ENABLE) };
        }
        PhysicalAddress::new(raw & APIC_BASE_MASK)
    }

    /// Software-enables the APIC through its mapping at `base`.
    ///
    /// # Safety
    /// `base` must map the page returned by [`physical_base`](Self::physical_base)
    /// uncached and stay mapped for the life of the kernel.
    pub unsafe fn enable(base: VirtualAddress) {
        BASE.store(base.as_u64(), Ordering::Release);
        write(REG_TPR, 0);
        write(REG_SVR, SVR_SOFTWARE_ENABLE | u32::from(SPURIOUS_VECTOR));
        log::info!("local APIC enabled at {base}");
    }

    /// Arms the periodic timer. Interrupts arrive once IF is set.
    pub fn start_timer() {
        write(REG_TIMER_DIVIDE, DIVIDE_BY_16);
        write(REG_LVT_TIMER, LVT_PERIODIC | u32::from(TIMER_VECTOR));
        write(REG_TIMER_INITIAL, TIMER_INITIAL_COUNT);
        log::info!("APIC timer armed at vector {TIMER_VECTOR}, count {TIMER_INITIAL_COUNT}");
    }
}

/// Signals end of interrupt for the in-service vector.
pub fn eoi() {
    write(REG_EOI, 0);
}

fn write(reg: u64, value: u32) {
    let base = BASE.load(Ordering::Acquire);
    if base == 0 {
        return;
    }
    let ptr = VirtualAddress::new(base + reg).as_mut_ptr::<u32>();
    // SAFETY: `base` maps the register page (see `enable`) and `reg` is an
    // aligned offset inside it.
    unsafe { ptr.write_volatile(value) };
}
