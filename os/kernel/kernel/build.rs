use kernel_info::memory::{KERNEL_BASE, KERNEL_STACK_SIZE, KERNEL_WINDOW_START, PHYS_LOAD};
use std::env;
use std::path::Path;

const TWO_MIB: u64 = 2 * 1024 * 1024;

/// Layout constants the linker script and the boot stub rely on.
fn check_layout() -> Result<(), String> {
    if !KERNEL_BASE.is_multiple_of(TWO_MIB) {
        return Err(format!("KERNEL_BASE {KERNEL_BASE:#x} is not 2 MiB aligned"));
    }
    if !PHYS_LOAD.is_multiple_of(4096) {
        return Err(format!("PHYS_LOAD {PHYS_LOAD:#x} is not page aligned"));
    }
    if KERNEL_BASE < KERNEL_WINDOW_START {
        return Err(format!(
            "KERNEL_BASE {KERNEL_BASE:#x} is below the shared kernel window at {KERNEL_WINDOW_START:#x}"
        ));
    }
    if !KERNEL_STACK_SIZE.is_multiple_of(16) {
        return Err(format!("KERNEL_STACK_SIZE {KERNEL_STACK_SIZE} is not 16-byte aligned"));
    }
    Ok(())
}

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("cargo sets CARGO_MANIFEST_DIR");
    let script = Path::new(&manifest_dir).join("kernel.ld");
    println!("cargo:rerun-if-changed={}", script.display());

    if let Err(message) = check_layout() {
        panic!("invalid kernel layout: {message}");
    }

    // Host builds only compile the descriptor encodings and their tests.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    for arg in [
        format!("-T{}", script.display()),
        format!("--defsym=KERNEL_BASE={KERNEL_BASE:#x}"),
        format!("--defsym=PHYS_LOAD={PHYS_LOAD:#x}"),
    ] {
        println!("cargo:rustc-link-arg-bins={arg}");
    }
}
