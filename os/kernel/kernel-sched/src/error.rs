use crate::{ProcessId, ThreadId};
use kernel_alloc::{FrameAllocError, VmError};
use kernel_vmem::PageTableError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SchedError {
    #[error("invalid process id {0}")]
    InvalidProcessId(ProcessId),
    #[error("invalid thread id {0}")]
    InvalidThreadId(ThreadId),
    #[error("the process table is full")]
    TooManyProcesses,
    #[error("no thread slot left")]
    TooManyThreads,
    #[error("process {0} has no segment slot left")]
    TooManySegments(ProcessId),
    #[error("process {0} has not been terminated")]
    NotTerminated(ProcessId),
    #[error("process {0} is executing")]
    ProcessRunning(ProcessId),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error(transparent)]
    PageTable(#[from] PageTableError),
    #[error(transparent)]
    Frame(#[from] FrameAllocError),
}
