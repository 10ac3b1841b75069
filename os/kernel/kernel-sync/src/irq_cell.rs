use crate::irq::IrqGuard;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// Returned when an [`IrqCell`] is entered while it is already borrowed.
///
/// On a single core this only happens when a fault or NMI interrupts code
/// that holds the cell.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("interrupt-masked cell entered re-entrantly")]
pub struct Reentered;

/// A value reachable only with interrupts masked.
///
/// [`with`](Self::with) disables interrupts, marks the cell borrowed and
/// passes `&mut T` to the closure. A nested `with` on the same cell returns
/// [`Reentered`] instead of aliasing the borrow.
///
/// ```
/// use kernel_sync::IrqCell;
///
/// static COUNTER: IrqCell<u32> = IrqCell::new(0);
///
/// COUNTER.with(|c| *c += 1).unwrap();
/// let nested = COUNTER.with(|_| COUNTER.with(|c| *c));
/// assert!(nested.unwrap().is_err());
/// assert_eq!(COUNTER.with(|c| *c), Ok(1));
/// ```
pub struct IrqCell<T> {
    borrowed: AtomicBool,
    value: UnsafeCell<T>,
}

// Safety: access is serialized by the `borrowed` flag; interrupts are masked
// while the flag is held.
unsafe impl<T: Send> Sync for IrqCell<T> {}
unsafe impl<T: Send> Send for IrqCell<T> {}

impl<T> IrqCell<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            borrowed: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Runs `f` on the contained value with interrupts disabled.
    ///
    /// # Errors
    /// [`Reentered`] if the cell is already borrowed further up the stack.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, Reentered> {
        let _irq = IrqGuard::new();
        if self.borrowed.swap(true, Ordering::Acquire) {
            return Err(Reentered);
        }
        let _borrow = Release(&self.borrowed);
        // Safety: `borrowed` was clear and is now set, so this is the only
        // live reference until `_borrow` drops.
        let value = unsafe { &mut *self.value.get() };
        Ok(f(value))
    }

    /// Whether a `with` call is currently in progress.
    #[must_use]
    pub fn is_borrowed(&self) -> bool {
        self.borrowed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

struct Release<'a>(&'a AtomicBool);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
