//! # QEMU Debug Output
//!
//! Early, allocation-free diagnostics for a kernel running under QEMU.
//!
//! Two byte sinks are supported:
//!
//! * the ISA debug console (`-debugcon`), a write-only port at `0x402`
//!   (or `0xE9` for Bochs-style setups), and
//! * the first 16550 UART (`COM1`, `0x3F8`), polled, 115200 8N1.
//!
//! [`QemuLogger`] is a [`log::Log`] backend that writes every record as
//! `"[LEVEL] target: message\n"` to all configured sinks. [`qemu_trace!`]
//! bypasses the `log` facade and is meant for fault paths where the logger
//! itself may be the problem.
//!
//! ```bash
//! qemu-system-x86_64 ... -debugcon file:debug.log -serial stdio
//! ```
//!
//! ```rust,no_run
//! use kernel_qemu::{QemuLogger, Sink};
//! use log::{LevelFilter, info};
//!
//! QemuLogger::new(LevelFilter::Debug, &[Sink::DebugCon, Sink::Com1])
//!     .init()
//!     .expect("logger initialization");
//! info!("scheduler online");
//! ```
//!
//! With the `enabled` feature off every write compiles to nothing. Off
//! target (`target_os != "none"`) the port instructions are omitted so the
//! formatting can be unit tested.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;
mod port;

pub use logger::{LoggerError, QemuLogger, format_record};
pub use port::Sink;

#[doc(hidden)]
pub mod qemu_fmt {
    use crate::port::Sink;
    use core::fmt;

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        if cfg!(feature = "enabled") {
            // Best-effort: a lost debug line is not worth a fault.
            let _ = fmt::write(&mut Sink::DebugCon.writer(), args);
        }
    }
}

/// Writes a `format!`-style message straight to the debug console.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
