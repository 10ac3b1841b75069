use kernel_info::memory::{REGION_POOL_FRAMES, THREAD_KERNEL_STACK_SIZE, USER_STACK_SIZE};
use kernel_info::params::KernelParams;

/// Sizes and policies applied to every new process and thread.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SchedulerConfig {
    /// Frames backing each process's region list.
    pub region_pool_frames: u64,
    pub user_stack_size: u64,
    pub kernel_stack_size: u64,
    /// Place stacks of spawned threads at random addresses.
    pub aslr: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            region_pool_frames: REGION_POOL_FRAMES as u64,
            user_stack_size: USER_STACK_SIZE,
            kernel_stack_size: THREAD_KERNEL_STACK_SIZE,
            aslr: true,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn from_params(params: &KernelParams<'_>) -> Self {
        Self {
            aslr: params.aslr,
            ..Self::default()
        }
    }
}
