//! # Exception policy
//!
//! The kernel's trap stubs save a [`CpuContext`] and call in here for CPU
//! exceptions. A breakpoint is logged and resumed. Every other handled
//! exception is a fault:
//!
//! 1. the vector, error code, CR2 (decoded for `#PF`), registers and CR3
//!    are logged at `error!`;
//! 2. a fault in the kernel process halts the machine;
//! 3. a fault in a user process terminates that process and the next
//!    thread is loaded into the saved context.

use crate::context::CpuContext;
use crate::kernel::KernelContext;
use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PhysMapper;
use log::{error, info};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum Exception {
    Breakpoint = 3,
    InvalidOpcode = 6,
    DoubleFault = 8,
    GeneralProtection = 13,
    PageFault = 14,
}

impl Exception {
    #[must_use]
    pub const fn from_vector(vector: u64) -> Option<Self> {
        Some(match vector {
            3 => Self::Breakpoint,
            6 => Self::InvalidOpcode,
            8 => Self::DoubleFault,
            13 => Self::GeneralProtection,
            14 => Self::PageFault,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Breakpoint => "#BP",
            Self::InvalidOpcode => "#UD",
            Self::DoubleFault => "#DF",
            Self::GeneralProtection => "#GP",
            Self::PageFault => "#PF",
        }
    }

    /// Whether the CPU pushes an error code for this vector.
    #[must_use]
    pub const fn has_error_code(self) -> bool {
        matches!(
            self,
            Self::DoubleFault | Self::GeneralProtection | Self::PageFault
        )
    }
}

/// Page-fault error code layout (x86-64).
///
/// Reference: Intel SDM Vol. 3A, §6.15.1 "Page-Fault Exception (#PF)".
#[bitfield(u64)]
pub struct PageFaultError {
    /// 0 = non-present page, 1 = protection violation.
    pub present: bool,
    /// 0 = read or execute, 1 = write.
    pub write: bool,
    /// 1 = CPL 3.
    pub user: bool,
    /// 1 = reserved bit set in a paging structure.
    pub reserved_bit: bool,
    /// 1 = instruction fetch.
    pub instruction_fetch: bool,
    /// 1 = protection-key violation.
    pub protection_key: bool,
    /// 1 = shadow stack access.
    pub shadow_stack: bool,
    #[bits(57)]
    __: u64,
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "non-present page"
        } else if self.reserved_bit() {
            "reserved bit set in a paging structure"
        } else if self.instruction_fetch() {
            if self.user() {
                "user instruction fetch from a protected page"
            } else {
                "kernel instruction fetch from a protected page"
            }
        } else if self.write() {
            "write to a protected page"
        } else {
            "read from a protected page"
        }
    }
}

impl fmt::Display for PageFaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} {} access)",
            self.explain(),
            if self.user() { "user" } else { "kernel" },
            if self.instruction_fetch() {
                "execute"
            } else if self.write() {
                "write"
            } else {
                "read"
            }
        )
    }
}

/// What the trap stub does next.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrapOutcome {
    /// Return into the saved context.
    Resume,
    /// Another thread was loaded; point `TSS.rsp0` at this stack top.
    Switched(VirtualAddress),
    /// Stop the machine.
    Halt,
}

fn log_registers(saved: &CpuContext) {
    let f = &saved.frame;
    error!(
        "rip={:#018x} cs={:#06x} rflags={:#010x} rsp={:#018x} ss={:#06x}",
        f.rip, f.cs, f.rflags, f.rsp, f.ss
    );
    error!(
        "rax={:#018x} rbx={:#018x} rcx={:#018x} rdx={:#018x}",
        saved.rax, saved.rbx, saved.rcx, saved.rdx
    );
    error!(
        "rsi={:#018x} rdi={:#018x} rbp={:#018x} r8 ={:#018x}",
        saved.rsi, saved.rdi, saved.rbp, saved.r8
    );
    error!(
        "r9 ={:#018x} r10={:#018x} r11={:#018x} r12={:#018x}",
        saved.r9, saved.r10, saved.r11, saved.r12
    );
    error!(
        "r13={:#018x} r14={:#018x} r15={:#018x} cr3={:#018x}",
        saved.r13, saved.r14, saved.r15, saved.cr3
    );
}

/// Applies the exception policy to the context in `saved`. `cr2` is only
/// read for a page fault.
pub fn handle_exception<M: PhysMapper>(
    kernel: &mut KernelContext<'_, M>,
    saved: &mut CpuContext,
    cr2: u64,
) -> TrapOutcome {
    let pid = kernel.scheduler.current_process();
    let Some(exception) = Exception::from_vector(saved.vector) else {
        error!("Unexpected vector {:#x} in process {pid}", saved.vector);
        return TrapOutcome::Halt;
    };

    if exception == Exception::Breakpoint {
        info!("{} at {:#x} in process {pid}", exception.mnemonic(), saved.frame.rip);
        return TrapOutcome::Resume;
    }

    error!(
        "{} in process {pid}, thread {}: error code {:#x}",
        exception.mnemonic(),
        kernel.scheduler.current(),
        saved.error_code
    );
    if exception == Exception::PageFault {
        let code = PageFaultError::from_bits(saved.error_code);
        error!("cr2={cr2:#018x}: {code}");
    }
    log_registers(saved);

    if pid.is_kernel() {
        error!("Fault in the kernel process; halting");
        return TrapOutcome::Halt;
    }

    match kernel.terminate_current(saved) {
        Ok(top) => TrapOutcome::Switched(top),
        Err(e) => {
            error!("Could not terminate process {pid}: {e}");
            TrapOutcome::Halt
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_fault_codes_decode() {
        let code = PageFaultError::from_bits(0b10);
        assert_eq!(code.explain(), "non-present page");
        assert_eq!(code.to_string(), "non-present page (kernel write access)");

        let code = PageFaultError::from_bits(0b1_0101);
        assert_eq!(code.explain(), "user instruction fetch from a protected page");

        let code = PageFaultError::new().with_present(true).with_user(true);
        assert_eq!(code.to_string(), "read from a protected page (user read access)");
    }

    #[test]
    fn vectors_map_to_exceptions() {
        assert_eq!(Exception::from_vector(14), Some(Exception::PageFault));
        assert_eq!(Exception::from_vector(32), None);
        assert!(Exception::DoubleFault.has_error_code());
        assert!(!Exception::InvalidOpcode.has_error_code());
    }
}
