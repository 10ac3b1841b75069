use crate::port::Sink;
use core::fmt::{self, Write};
use kernel_sync::SyncOnceCell;
use log::{LevelFilter, Log, Metadata, Record};

const MAX_SINKS: usize = 3;

static LOGGER: SyncOnceCell<QemuLogger> = SyncOnceCell::new();

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LoggerError {
    #[error("the QEMU logger was already initialized")]
    AlreadyInitialized,
    #[error("another logger is installed")]
    LoggerInstalled,
}

/// `log` backend writing to QEMU debug sinks.
pub struct QemuLogger {
    max_level: LevelFilter,
    sinks: [Option<Sink>; MAX_SINKS],
}

impl QemuLogger {
    /// Logger for `sinks` (at most three; extra entries are ignored).
    #[must_use]
    pub fn new(max_level: LevelFilter, sinks: &[Sink]) -> Self {
        let mut slots = [None; MAX_SINKS];
        for (slot, sink) in slots.iter_mut().zip(sinks) {
            *slot = Some(*sink);
        }
        Self {
            max_level,
            sinks: slots,
        }
    }

    /// Installs the logger as the global `log` backend. Call once during
    /// early init.
    ///
    /// # Errors
    /// Fails if called twice or if some other logger is already installed.
    pub fn init(self) -> Result<&'static Self, LoggerError> {
        let max_level = self.max_level;
        let logger = LOGGER
            .set(self)
            .map_err(|_| LoggerError::AlreadyInitialized)?;
        for sink in logger.sinks() {
            sink.init();
        }
        log::set_logger(logger).map_err(|_| LoggerError::LoggerInstalled)?;
        log::set_max_level(max_level);
        Ok(logger)
    }

    fn sinks(&self) -> impl Iterator<Item = Sink> + '_ {
        self.sinks.iter().flatten().copied()
    }
}

/// Formats a record as `"[LEVEL] target: message\n"`.
///
/// # Errors
/// Propagates errors from `out`.
pub fn format_record(out: &mut impl Write, record: &Record) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        for sink in self.sinks() {
            let _ = format_record(&mut sink.writer(), record);
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn record_layout() {
        let mut line = String::new();
        format_record(
            &mut line,
            &Record::builder()
                .level(Level::Warn)
                .target("kernel_alloc::vm")
                .args(format_args!("pool has {} free slots", 3))
                .build(),
        )
        .unwrap();
        assert_eq!(line, "[WARN] kernel_alloc::vm: pool has 3 free slots\n");
    }

    #[test]
    fn level_filter() {
        let logger = QemuLogger::new(LevelFilter::Info, &[Sink::DebugCon]);
        let debug = Metadata::builder().level(Level::Debug).build();
        let error = Metadata::builder().level(Level::Error).build();
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&error));
    }

    #[test]
    fn sinks_are_capped() {
        let logger = QemuLogger::new(
            LevelFilter::Trace,
            &[Sink::DebugCon, Sink::Com1, Sink::PortE9, Sink::Com1],
        );
        assert_eq!(logger.sinks().count(), 3);
    }
}
