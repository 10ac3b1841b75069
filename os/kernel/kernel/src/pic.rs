//! Legacy 8259 PIC pair.
//!
//! The kernel takes interrupts from the local APIC only, but the PICs still
//! power up mapped over the CPU exception vectors. They are remapped above
//! the exceptions and then fully masked, so a stray legacy IRQ can never
//! masquerade as a fault.

pub const MASTER_OFFSET: u8 = 0x20;
pub const SLAVE_OFFSET: u8 = 0x28;

const MASTER_CMD: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_CMD: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;

const ICW1_INIT_WITH_ICW4: u8 = 0x11;
const ICW4_8086: u8 = 0x01;
const MASK_ALL: u8 = 0xFF;

/// Port writes that reinitialise both PICs at the given offsets and mask
/// every line.
#[must_use]
pub const fn init_sequence(master: u8, slave: u8) -> [(u16, u8); 10] {
    [
        (MASTER_CMD, ICW1_INIT_WITH_ICW4),
        (SLAVE_CMD, ICW1_INIT_WITH_ICW4),
        (MASTER_DATA, master),
        (SLAVE_DATA, slave),
        // Slave on master IRQ2; slave cascade identity 2.
        (MASTER_DATA, 1 << 2),
        (SLAVE_DATA, 2),
        (MASTER_DATA, ICW4_8086),
        (SLAVE_DATA, ICW4_8086),
        (MASTER_DATA, MASK_ALL),
        (SLAVE_DATA, MASK_ALL),
    ]
}

/// # Safety
/// Port I/O at CPL 0 with interrupts disabled.
#[cfg(target_os = "none")]
pub unsafe fn remap_and_mask() {
    for (port, value) in init_sequence(MASTER_OFFSET, SLAVE_OFFSET) {
        unsafe {
            outb(port, value);
            io_wait();
        }
    }
    log::debug!("PIC remapped to {MASTER_OFFSET:#x}..{:#x} and masked", SLAVE_OFFSET + 8);
}

#[cfg(target_os = "none")]
#[inline]
unsafe fn outb(port: u16, value: u8) {
    unsafe {
        core::arch::asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
    }
}

/// A write to the POST port gives the old PICs time to settle.
#[cfg(target_os = "none")]
#[inline]
unsafe fn io_wait() {
    unsafe { outb(0x80, 0) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_remaps_above_exceptions_then_masks() {
        let seq = init_sequence(MASTER_OFFSET, SLAVE_OFFSET);
        assert_eq!(seq[0], (0x20, 0x11));
        assert_eq!(seq[1], (0xA0, 0x11));
        assert_eq!(seq[2], (0x21, 0x20));
        assert_eq!(seq[3], (0xA1, 0x28));
        assert_eq!(seq[4], (0x21, 4));
        assert_eq!(seq[5], (0xA1, 2));
        assert_eq!(&seq[8..], &[(0x21, 0xFF), (0xA1, 0xFF)]);
    }

    #[test]
    fn legacy_range_covers_the_timer_vector() {
        // Vector 32 is shared with the masked master's IRQ0.
        assert_eq!(u32::from(MASTER_OFFSET), 32);
        assert_eq!(SLAVE_OFFSET + 8, 0x30);
    }
}
