//! # Kernel Parameters
//!
//! Parses the raw argument string handed over in
//! [`KernelBootInfo::args`](crate::boot::KernelBootInfo::args).
//!
//! Tokens are separated by spaces or tabs. A token is either a bare flag
//! (`NoASLR`) or a `Key=Value` pair. Unknown keys are ignored with a warning
//! so that older kernels keep booting with newer loaders.
//!
//! | Token | Effect | Default |
//! |-------|--------|---------|
//! | `NoASLR` | Virtual allocations take the lowest fitting range | ASLR on |
//! | `InitProcess=<path>` | Path of the first user program | `X:/Init` |
//! | `LogLevel=<level>` | `off`, `error`, `warn`, `info`, `debug` or `trace` | `info` |
//!
//! ```rust
//! # use kernel_info::params::KernelParams;
//! # use log::LevelFilter;
//! let params = KernelParams::parse("NoASLR  LogLevel=debug\tInitProcess=X:/Shell").unwrap();
//! assert!(!params.aslr);
//! assert_eq!(params.init_process, "X:/Shell");
//! assert_eq!(params.log_level, LevelFilter::Debug);
//! ```

use log::{LevelFilter, warn};

/// Default first user program.
pub const DEFAULT_INIT_PROCESS: &str = "X:/Init";

/// Parsed kernel parameters.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct KernelParams<'a> {
    /// Randomize virtual allocations.
    pub aslr: bool,
    /// Path of the first user program.
    pub init_process: &'a str,
    /// Maximum level the kernel logger emits.
    pub log_level: LevelFilter,
}

/// Errors produced while parsing the argument string.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum ParamError<'a> {
    #[error("parameter `{0}` requires a value")]
    MissingValue(&'a str),
    #[error("flag `{0}` does not take a value")]
    UnexpectedValue(&'a str),
    #[error("unknown log level `{0}`")]
    InvalidLogLevel(&'a str),
}

impl Default for KernelParams<'_> {
    fn default() -> Self {
        Self {
            aslr: true,
            init_process: DEFAULT_INIT_PROCESS,
            log_level: LevelFilter::Info,
        }
    }
}

impl<'a> KernelParams<'a> {
    /// Parses `args`, starting from the defaults.
    ///
    /// # Errors
    /// Returns a [`ParamError`] for a known key with a missing or malformed
    /// value. Unknown keys are not an error.
    pub fn parse(args: &'a str) -> Result<Self, ParamError<'a>> {
        let mut params = Self::default();

        for token in args.split([' ', '\t']).filter(|t| !t.is_empty()) {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key, Some(value).filter(|v| !v.is_empty())),
                None => (token, None),
            };

            match (key, value) {
                ("NoASLR", None) => params.aslr = false,
                ("NoASLR", Some(_)) => return Err(ParamError::UnexpectedValue(key)),
                ("InitProcess", Some(path)) => params.init_process = path,
                ("LogLevel", Some(level)) => params.log_level = parse_level(level)?,
                ("InitProcess" | "LogLevel", None) => return Err(ParamError::MissingValue(key)),
                _ => warn!("Ignoring unknown kernel parameter `{token}`"),
            }
        }

        Ok(params)
    }
}

fn parse_level(level: &str) -> Result<LevelFilter, ParamError<'_>> {
    const LEVELS: [(&str, LevelFilter); 6] = [
        ("off", LevelFilter::Off),
        ("error", LevelFilter::Error),
        ("warn", LevelFilter::Warn),
        ("info", LevelFilter::Info),
        ("debug", LevelFilter::Debug),
        ("trace", LevelFilter::Trace),
    ];

    LEVELS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(level))
        .map(|&(_, filter)| filter)
        .ok_or(ParamError::InvalidLogLevel(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_gives_defaults() {
        assert_eq!(KernelParams::parse(""), Ok(KernelParams::default()));
        assert_eq!(KernelParams::parse("  \t "), Ok(KernelParams::default()));
    }

    #[test]
    fn flags_and_values() {
        let p = KernelParams::parse("InitProcess=X:/Bin/Sh NoASLR").unwrap();
        assert!(!p.aslr);
        assert_eq!(p.init_process, "X:/Bin/Sh");
        assert_eq!(p.log_level, LevelFilter::Info);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let p = KernelParams::parse("Quiet Color=none").unwrap();
        assert_eq!(p, KernelParams::default());
    }

    #[test]
    fn log_level_is_case_insensitive() {
        let p = KernelParams::parse("LogLevel=TRACE").unwrap();
        assert_eq!(p.log_level, LevelFilter::Trace);
    }

    #[test]
    fn malformed_known_keys_fail() {
        assert_eq!(
            KernelParams::parse("InitProcess="),
            Err(ParamError::MissingValue("InitProcess"))
        );
        assert_eq!(
            KernelParams::parse("LogLevel=loud"),
            Err(ParamError::InvalidLogLevel("loud"))
        );
        assert_eq!(
            KernelParams::parse("NoASLR=1"),
            Err(ParamError::UnexpectedValue("NoASLR"))
        );
    }
}
