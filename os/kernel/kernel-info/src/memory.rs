//! # Memory Layout and Capacity Limits

/// Start of the kernel half of the address space.
pub const KERNEL_HALF_START: u64 = 0xffff_8000_0000_0000;

/// One past the last user-space address.
pub const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

/// Direct map base the boot environment is expected to use. The kernel
/// trusts `KernelBootInfo::physical_memory_offset`; this is the default.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel executes (VMA), matches the linker script.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Where the image is placed in *physical* memory (LMA).
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Number of top-level PML4 slots reserved for the kernel VM allocator.
pub const KERNEL_PML4_ENTRIES: usize = 2;

/// First address of the kernel VM allocator window.
pub const KERNEL_WINDOW_START: u64 =
    KERNEL_HALF_START + 0x80_0000_0000 * (256 - KERNEL_PML4_ENTRIES as u64);

/// Lowest address any region allocator hands out. Page 0 stays unmapped.
pub const FIRST_USABLE_ADDRESS: u64 = 0x1000;

/// One past the highest address tracked by a region allocator.
pub const LAST_TRACKED_ADDRESS: u64 = 0xffff_ffff_ffff_f000;

/// Top of the main thread's user stack (exclusive).
pub const USER_STACK_TOP: u64 = 0x0000_7fff_ffff_f000;

/// User stack size per thread.
pub const USER_STACK_SIZE: u64 = 64 * 1024;

/// Kernel stack size per thread.
pub const THREAD_KERNEL_STACK_SIZE: u64 = 16 * 1024;

/// The size of the bootstrap kernel stack.
pub const KERNEL_STACK_SIZE: usize = 32 * 1024;

/// Process table capacity, including the kernel process.
pub const MAX_PROCESSES: usize = 16;

/// Thread table capacity across all processes.
pub const MAX_THREADS: usize = 64;

/// Threads a single process may own.
pub const MAX_THREADS_PER_PROCESS: usize = 4;

/// Program segments a single process may own.
pub const MAX_SEGMENTS_PER_PROCESS: usize = 8;

/// Frames backing each region allocator's node pool.
pub const REGION_POOL_FRAMES: usize = 25;

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(4096));
    assert!(THREAD_KERNEL_STACK_SIZE.is_multiple_of(4096));
    assert!(USER_STACK_SIZE.is_multiple_of(4096));
    assert!(USER_STACK_TOP < USER_SPACE_END);
    assert!(HHDM_BASE >= KERNEL_HALF_START);
    assert!(KERNEL_BASE >= KERNEL_WINDOW_START);
    assert!(HHDM_BASE < KERNEL_WINDOW_START);
    assert!(MAX_THREADS <= 64 && MAX_PROCESSES <= 64);
    assert!(KERNEL_PML4_ENTRIES > 0 && KERNEL_PML4_ENTRIES <= 256);
};
