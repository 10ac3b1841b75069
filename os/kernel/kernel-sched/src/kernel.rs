//! # Kernel context
//!
//! [`KernelContext`] is the one mutable root of kernel state: physical
//! frames, the kernel's region allocator and the scheduler tables. It is
//! passed explicitly to every trap handler; the kernel keeps a single
//! instance behind an interrupt-masked cell.
//!
//! ## Process lifetime
//!
//! ```text
//! create_process ──► threads Ready ──► terminate_start ──► terminate_finish
//!                                       (threads Dead,       (memory freed,
//!                                        nothing freed)       slot released)
//! ```
//!
//! `terminate_finish` refuses to run while the process is on the CPU, since
//! its kernel stack and page tables are still in use. The idle loop calls
//! [`reap`](KernelContext::reap) to finish whatever was left behind.

use crate::config::SchedulerConfig;
use crate::context::CpuContext;
use crate::error::SchedError;
use crate::process::{Process, ProcessId};
use crate::scheduler::Scheduler;
use crate::thread::{Extent, Thread, ThreadId, ThreadStatus};
use arrayvec::ArrayVec;
use kernel_alloc::{VirtualMemoryAllocator, VmContext, VmError};
use kernel_info::memory::{MAX_PROCESSES, MAX_THREADS, MAX_THREADS_PER_PROCESS, USER_STACK_TOP};
use kernel_memory_addresses::{VirtualAddress, align_down, align_up};
use kernel_syscall::{SyscallAction, SyscallArgs, SyscallHost};
use kernel_vmem::{AddressSpace, PageFlags, PhysMapper};
use log::{debug, error, info, warn};

const PAGE: u64 = 4096;

pub struct KernelContext<'k, M: PhysMapper> {
    pub memory: VmContext<'k, M>,
    /// Allocator for the shared kernel window; maps into the kernel PML4.
    pub kernel_vm: VirtualMemoryAllocator<'k>,
    pub scheduler: Scheduler<'k>,
    pub config: SchedulerConfig,
}

impl<'k, M: PhysMapper> KernelContext<'k, M> {
    /// Wraps the memory managers and registers the kernel process, whose
    /// only thread is the caller running on `idle_stack_top`.
    ///
    /// # Errors
    /// See [`Scheduler::new`].
    pub fn new(
        mut memory: VmContext<'k, M>,
        kernel_vm: VirtualMemoryAllocator<'k>,
        idle_stack_top: VirtualAddress,
        config: SchedulerConfig,
    ) -> Result<Self, SchedError> {
        memory.aslr = config.aslr;
        let scheduler = Scheduler::new(kernel_vm.root(), idle_stack_top)?;
        Ok(Self {
            memory,
            kernel_vm,
            scheduler,
            config,
        })
    }

    /// New address space with one `Ready` thread starting at `entry`.
    ///
    /// The address space shares the kernel half (with `USER` stripped) and
    /// gets its own region allocator. The main thread's user stack ends at
    /// [`USER_STACK_TOP`].
    ///
    /// # Errors
    /// - [`SchedError::TooManyProcesses`] / [`SchedError::TooManyThreads`]
    ///   before anything is allocated.
    /// - Frame, page-table and region errors. What was allocated up to the
    ///   failure stays allocated.
    pub fn create_process(&mut self, entry: VirtualAddress) -> Result<ProcessId, SchedError> {
        if !self.scheduler.has_process_capacity() {
            return Err(SchedError::TooManyProcesses);
        }
        if self.scheduler.thread_count() >= MAX_THREADS {
            return Err(SchedError::TooManyThreads);
        }

        let kernel_space = self.memory.space(self.kernel_vm.root());
        let space = AddressSpace::create(self.memory.mapper, &mut self.memory.frames)?;
        space.copy_kernel_half(&kernel_space);
        let root = space.root();

        let vm = VirtualMemoryAllocator::init_process(
            &mut self.memory,
            root,
            self.config.region_pool_frames,
        )?;
        let pid = self
            .scheduler
            .add_process(|id| Process::new(id, root, Some(vm)))?;

        let stack = VirtualAddress::new(USER_STACK_TOP - self.config.user_stack_size);
        let tid = self.build_thread(pid, entry, Some(stack))?;
        self.scheduler.launch(tid)?;

        info!("Process {pid} created: entry {entry}, PML4 {root}");
        Ok(pid)
    }

    /// Adds a `Ready` thread to `pid` with a user stack at a chosen address.
    ///
    /// # Errors
    /// - [`SchedError::InvalidProcessId`] for process 0, an unknown or a
    ///   terminating process.
    /// - [`SchedError::TooManyThreads`] if `pid` or the thread table is full.
    /// - Memory errors while creating the stacks.
    pub fn spawn_thread(
        &mut self,
        pid: ProcessId,
        entry: VirtualAddress,
    ) -> Result<ThreadId, SchedError> {
        let tid = self.build_thread(pid, entry, None)?;
        self.scheduler.launch(tid)?;
        debug!("Thread {tid} spawned in process {pid} at {entry}");
        Ok(tid)
    }

    fn build_thread(
        &mut self,
        pid: ProcessId,
        entry: VirtualAddress,
        stack_at: Option<VirtualAddress>,
    ) -> Result<ThreadId, SchedError> {
        let root = self
            .scheduler
            .process(pid)
            .filter(|p| !p.terminating && p.vm.is_some())
            .ok_or(SchedError::InvalidProcessId(pid))?
            .root;
        if !self.scheduler.has_thread_capacity(pid) {
            return Err(SchedError::TooManyThreads);
        }

        let size = self.config.user_stack_size;
        let vm = self
            .scheduler
            .process_mut(pid)
            .and_then(|p| p.vm.as_mut())
            .ok_or(SchedError::InvalidProcessId(pid))?;
        let begin = match stack_at {
            Some(begin) => {
                vm.allocate_backed_at(&mut self.memory, begin, size, PageFlags::USER_DATA)?;
                begin
            }
            None => vm.allocate_backed(&mut self.memory, size, PageFlags::USER_DATA)?,
        };
        let user_stack = Extent::new(begin, size);

        let kernel_size = self.config.kernel_stack_size;
        let kernel_begin =
            self.kernel_vm
                .allocate_backed(&mut self.memory, kernel_size, PageFlags::KERNEL_DATA)?;
        let kernel_stack = Extent::new(kernel_begin, kernel_size);

        let context = CpuContext::user_entry(root, entry, user_stack.end());
        self.scheduler.add_thread(pid, |id| Thread {
            id,
            process: pid,
            status: ThreadStatus::StartingUp,
            context,
            user_stack: Some(user_stack),
            kernel_stack: Some(kernel_stack),
            kernel_stack_top: kernel_stack.end(),
        })
    }

    /// Maps `bytes` at `vaddr` in `pid` and copies them in. The pages
    /// covering the range are fresh and zeroed, so bytes around the data
    /// within the first and last page read as 0.
    ///
    /// # Errors
    /// - [`SchedError::InvalidProcessId`] as for
    ///   [`spawn_thread`](Self::spawn_thread).
    /// - [`SchedError::TooManySegments`] if the process has no segment slot.
    /// - [`VmError::NotFound`] if any page of the range is in use.
    #[allow(unsafe_code, clippy::cast_possible_truncation)]
    pub fn load_segment(
        &mut self,
        pid: ProcessId,
        vaddr: VirtualAddress,
        bytes: &[u8],
        flags: PageFlags,
    ) -> Result<Extent, SchedError> {
        let process = self
            .scheduler
            .process_mut(pid)
            .filter(|p| !p.terminating)
            .ok_or(SchedError::InvalidProcessId(pid))?;
        if process.segments.is_full() {
            return Err(SchedError::TooManySegments(pid));
        }
        let vm = process.vm.as_mut().ok_or(SchedError::InvalidProcessId(pid))?;

        let begin = align_down(vaddr.as_u64(), PAGE);
        let end = vaddr
            .as_u64()
            .checked_add(bytes.len() as u64)
            .and_then(|end| align_up(end, PAGE))
            .ok_or(VmError::InvalidRange)?;
        let segment = Extent::new(VirtualAddress::new(begin), end - begin);
        vm.allocate_backed_at(&mut self.memory, segment.begin, segment.size, flags)?;

        let space = self.memory.space(process.root);
        let mut va = vaddr;
        let mut rest = bytes;
        while !rest.is_empty() {
            let chunk = ((PAGE - va.as_u64() % PAGE) as usize).min(rest.len());
            let pa = space.translate(va)?;
            // SAFETY: `pa..pa + chunk` lies inside a frame that was just
            // allocated for this segment.
            let dst = unsafe { self.memory.mapper.phys_to_slice_mut::<u8>(pa, chunk) };
            dst.copy_from_slice(&rest[..chunk]);
            va = va + chunk as u64;
            rest = &rest[chunk..];
        }

        process
            .segments
            .try_push(segment)
            .map_err(|_| SchedError::TooManySegments(pid))?;
        debug!(
            "Process {pid}: {} bytes loaded at {}..{}",
            bytes.len(),
            segment.begin,
            segment.end()
        );
        Ok(segment)
    }

    /// See [`Scheduler::terminate_start`].
    ///
    /// # Errors
    /// [`SchedError::InvalidProcessId`] for process 0 or an unknown process.
    pub fn terminate_start(&mut self, pid: ProcessId) -> Result<(), SchedError> {
        self.scheduler.terminate_start(pid)
    }

    /// Second phase of termination: frees segments, user stacks, kernel
    /// stacks, lower-half page tables, the region pool and the PML4, then
    /// releases the process slot.
    ///
    /// # Errors
    /// - [`SchedError::InvalidProcessId`] for process 0 or an unknown process.
    /// - [`SchedError::NotTerminated`] without a prior
    ///   [`terminate_start`](Self::terminate_start).
    /// - [`SchedError::ProcessRunning`] while one of its threads is on the
    ///   CPU.
    /// - Memory errors. The slot is already released when they occur.
    pub fn terminate_finish(&mut self, pid: ProcessId) -> Result<(), SchedError> {
        let process = self
            .scheduler
            .process(pid)
            .filter(|_| !pid.is_kernel())
            .ok_or(SchedError::InvalidProcessId(pid))?;
        if !process.terminating {
            return Err(SchedError::NotTerminated(pid));
        }
        if self.scheduler.is_executing(pid) {
            return Err(SchedError::ProcessRunning(pid));
        }

        let members = process.threads.clone();
        let mut threads: ArrayVec<Thread, MAX_THREADS_PER_PROCESS> = ArrayVec::new();
        for tid in members {
            if let Some(thread) = self.scheduler.remove_thread(tid) {
                threads.push(thread);
            }
        }
        let mut process = self
            .scheduler
            .remove_process(pid)
            .ok_or(SchedError::InvalidProcessId(pid))?;

        if let Some(vm) = process.vm.as_mut() {
            for segment in &process.segments {
                vm.deallocate_backed(&mut self.memory, segment.begin, segment.size)?;
            }
            for stack in threads.iter().filter_map(|t| t.user_stack) {
                vm.deallocate_backed(&mut self.memory, stack.begin, stack.size)?;
            }
        }
        for stack in threads.iter().filter_map(|t| t.kernel_stack) {
            self.kernel_vm
                .deallocate_backed(&mut self.memory, stack.begin, stack.size)?;
        }

        let space = self.memory.space(process.root);
        let frames = &mut self.memory.frames;
        let tables = space.free_user_tables(|frame| {
            if let Err(e) = frames.deallocate(frame) {
                warn!("Page table frame {frame} of process {pid}: {e}");
            }
        });

        if let Some(vm) = process.vm.take() {
            vm.release(&mut self.memory)?;
        }
        self.memory.frames.deallocate(process.root)?;

        info!("Process {pid} finished, {tables} page tables released");
        Ok(())
    }

    /// Both termination phases for a process that is not on the CPU.
    ///
    /// # Errors
    /// - [`SchedError::InvalidProcessId`] for process 0 or an unknown process.
    /// - [`SchedError::ProcessRunning`] if it is executing; nothing changes.
    /// - As [`terminate_finish`](Self::terminate_finish).
    pub fn delete_process(&mut self, pid: ProcessId) -> Result<(), SchedError> {
        if pid.is_kernel() || self.scheduler.process(pid).is_none() {
            return Err(SchedError::InvalidProcessId(pid));
        }
        if self.scheduler.is_executing(pid) {
            return Err(SchedError::ProcessRunning(pid));
        }
        self.terminate_start(pid)?;
        self.terminate_finish(pid)
    }

    /// Finishes every terminating process that is not on the CPU. Returns
    /// how many were torn down.
    pub fn reap(&mut self) -> usize {
        let pending: ArrayVec<ProcessId, MAX_PROCESSES> = self
            .scheduler
            .processes()
            .filter(|p| p.terminating && !self.scheduler.is_executing(p.id))
            .map(|p| p.id)
            .collect();

        let mut finished = 0;
        for pid in pending {
            match self.terminate_finish(pid) {
                Ok(()) => finished += 1,
                Err(e) => error!("Teardown of process {pid} failed: {e}"),
            }
        }
        finished
    }

    /// See [`Scheduler::schedule`].
    pub fn schedule(&mut self, saved: &mut CpuContext) -> Option<VirtualAddress> {
        self.scheduler.schedule(saved)
    }

    /// See [`Scheduler::schedule_discard`].
    pub fn schedule_discard(&mut self, saved: &mut CpuContext) -> VirtualAddress {
        self.scheduler.schedule_discard(saved)
    }

    /// Terminates the running thread's process and loads the next thread
    /// into `saved`.
    ///
    /// # Errors
    /// [`SchedError::InvalidProcessId`] if the kernel process is running.
    pub fn terminate_current(
        &mut self,
        saved: &mut CpuContext,
    ) -> Result<VirtualAddress, SchedError> {
        let pid = self.scheduler.current_process();
        self.scheduler.terminate_start(pid)?;
        Ok(self.scheduler.schedule_discard(saved))
    }

    /// Runs the syscall described by `saved` and writes its result to
    /// `saved.rax`. Returns the new kernel stack top if another thread was
    /// loaded into `saved`.
    pub fn handle_syscall(
        &mut self,
        saved: &mut CpuContext,
        host: &mut dyn SyscallHost,
    ) -> Option<VirtualAddress> {
        let args = SyscallArgs {
            rdi: saved.rdi,
            rsi: saved.rsi,
            rdx: saved.rdx,
            r10: saved.r10,
            r8: saved.r8,
            r9: saved.r9,
        };
        match kernel_syscall::dispatch(host, saved.rax, args) {
            Ok(SyscallAction::Resume(value)) => {
                saved.rax = value;
                None
            }
            Ok(SyscallAction::Yield) => {
                saved.rax = 0;
                self.schedule(saved)
            }
            Ok(SyscallAction::Terminate) => match self.terminate_current(saved) {
                Ok(top) => Some(top),
                Err(e) => {
                    warn!("Terminate syscall refused: {e}");
                    saved.rax = u64::MAX;
                    None
                }
            },
            Err(e) => {
                debug!("Process {}: {e}", self.scheduler.current_process());
                saved.rax = e.code();
                None
            }
        }
    }
}
