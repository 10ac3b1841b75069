use crate::ProcessId;
use crate::arena::Handle;
use crate::context::CpuContext;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;

/// Generation-checked index into the thread table.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ThreadId(pub(crate) Handle);

impl ThreadId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0.index()
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({:?})", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// ```text
/// StartingUp ──launch──► Ready ◄──schedule──► Running
///                          │                     │
///                          └──── terminate ──────┴──► Dead
/// ```
///
/// `Sleeping` exists for a blocking primitive that is not implemented yet;
/// no thread enters it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ThreadStatus {
    StartingUp,
    Ready,
    Running,
    Sleeping,
    Dead,
}

/// A page-aligned virtual range backed by frames.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Extent {
    pub begin: VirtualAddress,
    pub size: u64,
}

impl Extent {
    #[must_use]
    pub const fn new(begin: VirtualAddress, size: u64) -> Self {
        Self { begin, size }
    }

    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.begin.as_u64() + self.size)
    }

    #[must_use]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        va >= self.begin && va < self.end()
    }
}

pub struct Thread {
    pub id: ThreadId,
    pub process: ProcessId,
    pub status: ThreadStatus,
    pub context: CpuContext,
    /// `None` for the kernel's idle thread.
    pub user_stack: Option<Extent>,
    /// `None` for the idle thread, which runs on the boot stack.
    pub kernel_stack: Option<Extent>,
    /// Loaded into `TSS.rsp0` while this thread runs.
    pub kernel_stack_top: VirtualAddress,
}

impl Thread {
    #[must_use]
    pub const fn is_schedulable(&self) -> bool {
        matches!(self.status, ThreadStatus::Ready)
    }
}
