//! # Kernel synchronization primitives
//!
//! The kernel runs on a single core. The only thing that can interleave with
//! kernel code is an interrupt, so mutual exclusion is interrupt masking:
//!
//! * [`IrqGuard`] clears `IF` for its lifetime and restores the previous state.
//! * [`IrqCell`] owns a value that is only reachable with interrupts masked
//!   and reports re-entry instead of handing out a second `&mut`.
//! * [`SyncOnceCell`] publishes a value exactly once.
//!
//! Off target (`target_os != "none"`) the interrupt instructions compile to
//! nothing, so the bookkeeping can be exercised by host tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod irq_cell;
mod sync_once_cell;

pub use irq::IrqGuard;
pub use irq_cell::{IrqCell, Reentered};
pub use sync_once_cell::SyncOnceCell;
