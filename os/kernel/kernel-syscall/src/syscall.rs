use log::trace;

/// Numbers accepted in `RAX`.
#[repr(u64)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Syscall {
    /// End the calling process.
    Terminate = 0,
    /// Write the low byte of `RDI` to the kernel's debug sink.
    DebugWrite = 1,
    /// Give up the rest of the time slice.
    Yield = 2,
}

impl TryFrom<u64> for Syscall {
    type Error = SyscallError;

    fn try_from(number: u64) -> Result<Self, Self::Error> {
        match number {
            0 => Ok(Self::Terminate),
            1 => Ok(Self::DebugWrite),
            2 => Ok(Self::Yield),
            _ => Err(SyscallError::InvalidSyscallNumber(number)),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SyscallError {
    #[error("invalid syscall number {0}")]
    InvalidSyscallNumber(u64),
}

impl SyscallError {
    /// Value placed in the caller's `RAX`.
    #[must_use]
    pub const fn code(self) -> u64 {
        match self {
            Self::InvalidSyscallNumber(_) => u64::MAX,
        }
    }
}

/// The six argument registers, in ABI order.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct SyscallArgs {
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub r10: u64,
    pub r8: u64,
    pub r9: u64,
}

/// The side effects a syscall may have that the table itself cannot perform.
pub trait SyscallHost {
    fn debug_write(&mut self, byte: u8);
}

/// What the trap path does after the table has run.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SyscallAction {
    /// Return to the caller with this value in `RAX`.
    Resume(u64),
    /// Put `0` in `RAX` and reschedule; the caller stays `Ready`.
    Yield,
    /// Terminate the calling process. Its context is discarded.
    Terminate,
}

/// Decodes `number` and runs the matching handler.
///
/// # Errors
/// [`SyscallError::InvalidSyscallNumber`] for a number not in the table.
#[allow(clippy::cast_possible_truncation)]
pub fn dispatch(
    host: &mut dyn SyscallHost,
    number: u64,
    args: SyscallArgs,
) -> Result<SyscallAction, SyscallError> {
    let syscall = Syscall::try_from(number)?;
    trace!("syscall {syscall:?} rdi={:#x}", args.rdi);
    Ok(match syscall {
        Syscall::Terminate => SyscallAction::Terminate,
        Syscall::DebugWrite => {
            host.debug_write(args.rdi as u8);
            SyscallAction::Resume(0)
        }
        Syscall::Yield => SyscallAction::Yield,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture(Vec<u8>);

    impl SyscallHost for Capture {
        fn debug_write(&mut self, byte: u8) {
            self.0.push(byte);
        }
    }

    #[test]
    fn debug_write_takes_the_low_byte() {
        let mut host = Capture::default();
        let args = SyscallArgs {
            rdi: 0x1234_5641,
            ..SyscallArgs::default()
        };
        assert_eq!(dispatch(&mut host, 1, args), Ok(SyscallAction::Resume(0)));
        assert_eq!(host.0, b"A");
    }

    #[test]
    fn control_calls_have_no_side_effects() {
        let mut host = Capture::default();
        assert_eq!(dispatch(&mut host, 0, SyscallArgs::default()), Ok(SyscallAction::Terminate));
        assert_eq!(dispatch(&mut host, 2, SyscallArgs::default()), Ok(SyscallAction::Yield));
        assert!(host.0.is_empty());
    }

    #[test]
    fn unknown_numbers_are_rejected() {
        let mut host = Capture::default();
        for number in [3, 0x80, u64::MAX] {
            let err = dispatch(&mut host, number, SyscallArgs::default()).unwrap_err();
            assert_eq!(err, SyscallError::InvalidSyscallNumber(number));
            assert_eq!(err.code(), u64::MAX);
        }
    }
}
