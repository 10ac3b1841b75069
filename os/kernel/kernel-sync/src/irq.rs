//! Interrupt flag control.
//!
//! All functions require CPL 0 on the real target. On hosted builds they are
//! no-ops and [`interrupts_enabled`] reports `false`.

const RFLAGS_IF: u64 = 1 << 9;

/// Disables maskable interrupts (`cli`).
#[inline]
pub fn disable() {
    #[cfg(target_os = "none")]
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack, preserves_flags));
    }
}

/// Enables maskable interrupts (`sti`).
#[inline]
pub fn enable() {
    #[cfg(target_os = "none")]
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
    }
}

/// Whether `IF` is currently set.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    #[cfg(target_os = "none")]
    {
        let flags: u64;
        unsafe {
            core::arch::asm!("pushfq", "pop {}", out(reg) flags, options(nomem, preserves_flags));
        }
        flags & RFLAGS_IF != 0
    }
    #[cfg(not(target_os = "none"))]
    {
        let _ = RFLAGS_IF;
        false
    }
}

/// Runs `f` with interrupts disabled.
#[inline]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let _guard = IrqGuard::new();
    f()
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// Guards nest: only the outermost one that saw `IF = 1` re-enables.
///
/// ```
/// use kernel_sync::irq::{IrqGuard, interrupts_enabled};
///
/// let before = interrupts_enabled();
/// {
///     let _g = IrqGuard::new();
///     assert!(!interrupts_enabled());
/// }
/// assert_eq!(interrupts_enabled(), before);
/// ```
#[must_use = "interrupts are re-enabled as soon as the guard is dropped"]
pub struct IrqGuard {
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    pub fn new() -> Self {
        let were_enabled = interrupts_enabled();
        if were_enabled {
            disable();
        }
        Self { were_enabled }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            enable();
        }
    }
}
