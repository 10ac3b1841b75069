//! # Saved CPU state
//!
//! [`CpuContext`] is exactly what the kernel's trap and syscall stubs push:
//! the CPU's interrupt frame at the top, a vector and error code below it,
//! the general-purpose registers below that and CR3 last. The stubs hand
//! Rust a pointer to the lowest field; Rust may rewrite any of it, and the
//! stub restores whatever the structure holds when the handler returns.
//!
//! ```text
//!  high ┌──────────────┐
//!       │ ss           │ ┐
//!       │ rsp          │ │
//!       │ rflags       │ │ pushed by the CPU
//!       │ cs           │ │
//!       │ rip          │ ┘
//!       │ error_code   │   pushed by the CPU or a dummy 0
//!       │ vector       │
//!       │ r15 .. rax   │   general-purpose registers
//!  low  │ cr3          │ ◄── &mut CpuContext
//!       └──────────────┘
//! ```

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// GDT layout shared with the kernel's descriptor tables.
pub mod selectors {
    pub const KERNEL_CS: u16 = 0x08;
    pub const KERNEL_DS: u16 = 0x10;
    /// User data, RPL 3. Precedes user code so `sysret` can derive both.
    pub const USER_DS: u16 = 0x18 | 3;
    pub const USER_CS: u16 = 0x20 | 3;
    pub const TSS: u16 = 0x28;
}

/// `IF` set, reserved bit 1 set.
pub const USER_RFLAGS: u64 = 0x202;

/// Vector recorded for frames built by the `syscall` entry stub.
pub const SYSCALL_MARKER: u64 = 0x100;

/// What the CPU pushes on an interrupt or exception, and pops on `iretq`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct InterruptFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl InterruptFrame {
    /// Whether the interrupted code ran in ring 3.
    #[must_use]
    pub const fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct CpuContext {
    pub cr3: u64,
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub vector: u64,
    pub error_code: u64,
    pub frame: InterruptFrame,
}

const _: () = assert!(size_of::<CpuContext>() == 23 * 8);

impl CpuContext {
    /// First entry into ring 3 at `entry` with an empty stack ending at
    /// `stack_top`.
    #[must_use]
    pub fn user_entry(
        root: PhysicalPage<Size4K>,
        entry: VirtualAddress,
        stack_top: VirtualAddress,
    ) -> Self {
        Self {
            cr3: root.base().as_u64(),
            frame: InterruptFrame {
                rip: entry.as_u64(),
                cs: u64::from(selectors::USER_CS),
                rflags: USER_RFLAGS,
                rsp: stack_top.as_u64(),
                ss: u64::from(selectors::USER_DS),
            },
            ..Self::default()
        }
    }

    /// The PML4 this context runs in.
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        PhysicalAddress::new(self.cr3).page()
    }

    #[must_use]
    pub const fn is_syscall(&self) -> bool {
        self.vector == SYSCALL_MARKER
    }
}
