//! # System Calls
//!
//! Syscall numbers, argument decoding and the dispatch table, independent of
//! how the kernel enters ring 0.
//!
//! ## Calling convention
//!
//! User code loads the number into `RAX` and up to six arguments into
//! `RDI, RSI, RDX, R10, R8, R9`, then executes `syscall`. The kernel writes
//! the result back to `RAX`. `RCX` and `R11` are clobbered by the CPU.
//!
//! | No. | Name         | Arguments       | Result                     |
//! |-----|--------------|-----------------|----------------------------|
//! | 0   | `Terminate`  | none            | does not return            |
//! | 1   | `DebugWrite` | `RDI`: the byte | `0`                        |
//! | 2   | `Yield`      | none            | `0` once rescheduled       |
//!
//! An unknown number yields [`SyscallError::InvalidSyscallNumber`], whose
//! [`code`](SyscallError::code) is what the caller sees in `RAX`.
//!
//! [`programs`] holds a few hand-assembled user programs that exercise the
//! table.

#![cfg_attr(not(test), no_std)]

pub mod programs;
mod syscall;

pub use syscall::{Syscall, SyscallAction, SyscallArgs, SyscallError, SyscallHost, dispatch};
