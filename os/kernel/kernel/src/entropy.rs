//! Boot-time seed for the placement RNG.
//!
//! The time stamp counter and a few loader-chosen values are always mixed
//! in. Hardware words come from `rdseed` when CPUID advertises it, else from
//! `rdrand`, else from further TSC reads.

use core::arch::x86_64::{__cpuid, __cpuid_count, _rdtsc};

const HARDWARE_WORDS: usize = 4;
const RETRIES: usize = 10;

pub const BOOT_WORDS: usize = 4;
pub const SEED_WORDS: usize = 1 + HARDWARE_WORDS + BOOT_WORDS;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Source {
    RdSeed,
    RdRand,
    Tsc,
}

/// Seed words for [`ChaCha20Rng::from_seed`](kernel_alloc::ChaCha20Rng::from_seed).
#[must_use]
pub fn seed(boot_values: [u64; BOOT_WORDS]) -> [u64; SEED_WORDS] {
    let mut words = [0u64; SEED_WORDS];
    words[0] = tsc();

    let source = detect();
    if source == Source::Tsc {
        log::warn!("neither rdseed nor rdrand is available; placement seed is weak");
    } else {
        log::debug!("placement seed from {source:?}");
    }
    for word in &mut words[1..=HARDWARE_WORDS] {
        *word = read(source).unwrap_or_else(tsc);
    }

    words[1 + HARDWARE_WORDS..].copy_from_slice(&boot_values);
    words
}

fn tsc() -> u64 {
    // SAFETY: rdtsc is unprivileged unless CR4.TSD is set, which the kernel never does.
    unsafe { _rdtsc() }
}

fn detect() -> Source {
    // SAFETY: leaves 0, 1 and 7 exist on every x86-64 CPU the kernel boots on.
    let (max_leaf, leaf1) = unsafe { (__cpuid(0).eax, __cpuid(1)) };
    if max_leaf >= 7 {
        // SAFETY: as above.
        let leaf7 = unsafe { __cpuid_count(7, 0) };
        if leaf7.ebx & (1 << 18) != 0 {
            return Source::RdSeed;
        }
    }
    if leaf1.ecx & (1 << 30) != 0 {
        Source::RdRand
    } else {
        Source::Tsc
    }
}

fn read(source: Source) -> Option<u64> {
    for _ in 0..RETRIES {
        let value: u64;
        let ok: u8;
        // SAFETY: each instruction is only issued after CPUID reported it.
        unsafe {
            match source {
                Source::RdSeed => core::arch::asm!(
                    "rdseed {v}",
                    "setc {ok}",
                    v = out(reg) value,
                    ok = out(reg_byte) ok,
                    options(nomem, nostack),
                ),
                Source::RdRand => core::arch::asm!(
                    "rdrand {v}",
                    "setc {ok}",
                    v = out(reg) value,
                    ok = out(reg_byte) ok,
                    options(nomem, nostack),
                ),
                Source::Tsc => return None,
            }
        }
        if ok != 0 {
            return Some(value);
        }
    }
    None
}
