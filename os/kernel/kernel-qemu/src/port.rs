use core::fmt;

/// A byte-oriented output device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Sink {
    /// QEMU `isa-debugcon` at port `0x402`.
    DebugCon,
    /// Bochs/QEMU `0xE9` hack port.
    PortE9,
    /// 16550 UART at `0x3F8`.
    Com1,
}

const DEBUGCON: u16 = 0x402;
const PORT_E9: u16 = 0xE9;
const COM1: u16 = 0x3F8;

/// Line status register: transmit holding register empty.
const LSR_THRE: u8 = 1 << 5;

impl Sink {
    /// Programs the device. Only the UART needs it.
    pub fn init(self) {
        if self == Self::Com1 {
            // SAFETY: standard 16550 programming sequence on a legacy port.
            unsafe {
                outb(COM1 + 1, 0x00); // no interrupts
                outb(COM1 + 3, 0x80); // DLAB on
                outb(COM1, 0x01); // divisor 1 = 115200 baud
                outb(COM1 + 1, 0x00);
                outb(COM1 + 3, 0x03); // 8N1, DLAB off
                outb(COM1 + 2, 0xC7); // FIFO on, cleared, 14-byte threshold
                outb(COM1 + 4, 0x03); // DTR | RTS
            }
        }
    }

    pub fn write_byte(self, byte: u8) {
        // SAFETY: writes to legacy ports owned by this crate.
        unsafe {
            match self {
                Self::DebugCon => outb(DEBUGCON, byte),
                Self::PortE9 => outb(PORT_E9, byte),
                Self::Com1 => {
                    if byte == b'\n' {
                        com1_put(b'\r');
                    }
                    com1_put(byte);
                }
            }
        }
    }

    pub fn write_bytes(self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    /// A `fmt::Write` adapter for this sink.
    #[must_use]
    pub const fn writer(self) -> SinkWriter {
        SinkWriter(self)
    }
}

pub struct SinkWriter(Sink);

impl fmt::Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_bytes(s.as_bytes());
        Ok(())
    }
}

unsafe fn com1_put(byte: u8) {
    unsafe {
        // Bounded so an absent UART can't hang the logger.
        for _ in 0..10_000 {
            if inb(COM1 + 5) & LSR_THRE != 0 {
                break;
            }
            core::hint::spin_loop();
        }
        outb(COM1, byte);
    }
}

#[inline]
unsafe fn outb(port: u16, val: u8) {
    #[cfg(all(target_os = "none", feature = "enabled"))]
    unsafe {
        core::arch::asm!("out dx, al", in("dx") port, in("al") val, options(nomem, nostack, preserves_flags));
    }
    #[cfg(not(all(target_os = "none", feature = "enabled")))]
    let _ = (port, val);
}

#[inline]
unsafe fn inb(port: u16) -> u8 {
    #[cfg(all(target_os = "none", feature = "enabled"))]
    {
        let val: u8;
        unsafe {
            core::arch::asm!("in al, dx", in("dx") port, out("al") val, options(nomem, nostack, preserves_flags));
        }
        val
    }
    #[cfg(not(all(target_os = "none", feature = "enabled")))]
    {
        let _ = port;
        LSR_THRE
    }
}
