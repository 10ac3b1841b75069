use crate::arena::Handle;
use crate::thread::{Extent, ThreadId};
use arrayvec::ArrayVec;
use core::fmt;
use kernel_alloc::VirtualMemoryAllocator;
use kernel_info::memory::{MAX_SEGMENTS_PER_PROCESS, MAX_THREADS_PER_PROCESS};
use kernel_memory_addresses::{PhysicalPage, Size4K};

/// Generation-checked index into the process table.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ProcessId(pub(crate) Handle);

impl ProcessId {
    /// The kernel itself. Never terminated.
    pub const KERNEL: Self = Self(Handle::new(0, 0));

    #[must_use]
    pub const fn index(self) -> usize {
        self.0.index()
    }

    #[must_use]
    pub fn is_kernel(self) -> bool {
        self == Self::KERNEL
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({:?})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

pub struct Process<'k> {
    pub id: ProcessId,
    /// PML4 frame loaded into CR3 for every thread of this process.
    pub root: PhysicalPage<Size4K>,
    /// Lower-half allocator. The kernel process uses the kernel's own
    /// allocator instead.
    pub vm: Option<VirtualMemoryAllocator<'k>>,
    pub threads: ArrayVec<ThreadId, MAX_THREADS_PER_PROCESS>,
    /// Program images loaded at fixed addresses.
    pub segments: ArrayVec<Extent, MAX_SEGMENTS_PER_PROCESS>,
    /// Set by the first phase of termination.
    pub terminating: bool,
}

impl<'k> Process<'k> {
    #[must_use]
    pub const fn new(
        id: ProcessId,
        root: PhysicalPage<Size4K>,
        vm: Option<VirtualMemoryAllocator<'k>>,
    ) -> Self {
        Self {
            id,
            root,
            vm,
            threads: ArrayVec::new_const(),
            segments: ArrayVec::new_const(),
            terminating: false,
        }
    }
}
