//! # Processes, Threads and Scheduling
//!
//! ```text
//!              ┌──────────────────────────────────────────┐
//!  trap stubs ─► KernelContext                            │
//!              │  ├─ memory: frames, mapper, TLB, RNG     │
//!              │  ├─ kernel_vm: kernel window regions     │
//!              │  └─ scheduler                            │
//!              │       ├─ processes: Arena<Process, 16>   │
//!              │       └─ threads:   Arena<Thread, 64>    │
//!              └──────────────────────────────────────────┘
//! ```
//!
//! Process 0 is the kernel. Its only thread is the boot thread, which becomes
//! the idle thread once the scheduler is up. Every other process has its own
//! PML4 (the kernel half shared), its own region allocator, and threads with
//! a user stack in that process and a kernel stack in the kernel window.
//!
//! Processes and threads are referred to by [`ProcessId`] and [`ThreadId`]:
//! slot indices plus a generation, so an id outlives its process safely.
//!
//! Termination has two phases. [`KernelContext::terminate_start`] only marks
//! the process; [`KernelContext::terminate_finish`] frees its memory once
//! none of its threads is on the CPU.

#![cfg_attr(not(test), no_std)]

pub mod arena;
mod config;
pub mod context;
mod error;
mod kernel;
mod process;
mod scheduler;
mod thread;
pub mod trap;

pub use config::SchedulerConfig;
pub use context::{CpuContext, InterruptFrame};
pub use error::SchedError;
pub use kernel::KernelContext;
pub use process::{Process, ProcessId};
pub use scheduler::Scheduler;
pub use thread::{Extent, Thread, ThreadId, ThreadStatus};
pub use trap::{TrapOutcome, handle_exception};
