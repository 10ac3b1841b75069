//! # Round-robin scheduler
//!
//! Owns the process and thread tables. Nothing here allocates memory; the
//! [`KernelContext`](crate::KernelContext) builds threads and processes and
//! tears them down, and this module only decides who runs.
//!
//! ## Selection
//!
//! A cursor starts at the slot after the running thread and walks the thread
//! table once, wrapping around, taking the first `Ready` thread that is not
//! the idle thread. The idle thread runs only when no other thread is
//! `Ready` and the running one cannot continue.
//!
//! Must be called with interrupts disabled.

use crate::arena::Arena;
use crate::context::CpuContext;
use crate::error::SchedError;
use crate::process::{Process, ProcessId};
use crate::thread::{Thread, ThreadId, ThreadStatus};
use kernel_info::memory::{MAX_PROCESSES, MAX_THREADS};
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use log::{debug, trace};

pub struct Scheduler<'k> {
    processes: Arena<Process<'k>, MAX_PROCESSES>,
    threads: Arena<Thread, MAX_THREADS>,
    current: ThreadId,
    idle: ThreadId,
}

impl<'k> Scheduler<'k> {
    /// Registers process 0 with the kernel PML4 and its main thread, which
    /// is the caller and therefore already `Running`.
    ///
    /// # Errors
    /// Only if the tables cannot hold a single entry.
    pub fn new(
        kernel_root: PhysicalPage<Size4K>,
        idle_stack_top: VirtualAddress,
    ) -> Result<Self, SchedError> {
        let mut processes = Arena::new();
        let pid = processes
            .insert_with_handle(|h| Process::new(ProcessId(h), kernel_root, None))
            .map(ProcessId)
            .ok_or(SchedError::TooManyProcesses)?;
        debug_assert_eq!(pid, ProcessId::KERNEL);

        let mut threads = Arena::new();
        let idle = threads
            .insert_with_handle(|h| Thread {
                id: ThreadId(h),
                process: pid,
                status: ThreadStatus::Running,
                context: CpuContext {
                    cr3: kernel_root.base().as_u64(),
                    ..CpuContext::default()
                },
                user_stack: None,
                kernel_stack: None,
                kernel_stack_top: idle_stack_top,
            })
            .map(ThreadId)
            .ok_or(SchedError::TooManyThreads)?;

        let mut scheduler = Self {
            processes,
            threads,
            current: idle,
            idle,
        };
        if let Some(kernel) = scheduler.processes.get_mut(pid.0) {
            let _ = kernel.threads.try_push(idle);
        }
        Ok(scheduler)
    }

    #[must_use]
    pub const fn current(&self) -> ThreadId {
        self.current
    }

    #[must_use]
    pub const fn idle(&self) -> ThreadId {
        self.idle
    }

    /// Owner of the running thread.
    #[must_use]
    pub fn current_process(&self) -> ProcessId {
        self.threads
            .get(self.current.0)
            .map_or(ProcessId::KERNEL, |t| t.process)
    }

    /// Whether a thread of `pid` is on the CPU.
    #[must_use]
    pub fn is_executing(&self, pid: ProcessId) -> bool {
        self.current_process() == pid
    }

    #[must_use]
    pub fn process(&self, pid: ProcessId) -> Option<&Process<'k>> {
        self.processes.get(pid.0)
    }

    pub fn process_mut(&mut self, pid: ProcessId) -> Option<&mut Process<'k>> {
        self.processes.get_mut(pid.0)
    }

    #[must_use]
    pub fn thread(&self, tid: ThreadId) -> Option<&Thread> {
        self.threads.get(tid.0)
    }

    pub fn thread_mut(&mut self, tid: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(tid.0)
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process<'k>> + '_ {
        self.processes.iter().map(|(_, p)| p)
    }

    pub fn threads(&self) -> impl Iterator<Item = &Thread> + '_ {
        self.threads.iter().map(|(_, t)| t)
    }

    #[must_use]
    pub const fn process_count(&self) -> usize {
        self.processes.len()
    }

    #[must_use]
    pub const fn thread_count(&self) -> usize {
        self.threads.len()
    }

    #[must_use]
    pub const fn has_process_capacity(&self) -> bool {
        !self.processes.is_full()
    }

    /// Whether `pid` may take one more thread.
    #[must_use]
    pub fn has_thread_capacity(&self, pid: ProcessId) -> bool {
        !self.threads.is_full() && self.process(pid).is_some_and(|p| !p.threads.is_full())
    }

    /// Stores the process built by `make`.
    ///
    /// # Errors
    /// [`SchedError::TooManyProcesses`] if the table is full.
    pub fn add_process(
        &mut self,
        make: impl FnOnce(ProcessId) -> Process<'k>,
    ) -> Result<ProcessId, SchedError> {
        self.processes
            .insert_with_handle(|h| make(ProcessId(h)))
            .map(ProcessId)
            .ok_or(SchedError::TooManyProcesses)
    }

    /// Stores the thread built by `make` as a member of `pid`.
    ///
    /// # Errors
    /// - [`SchedError::InvalidProcessId`] for an unknown process.
    /// - [`SchedError::TooManyThreads`] if either table is full.
    pub fn add_thread(
        &mut self,
        pid: ProcessId,
        make: impl FnOnce(ThreadId) -> Thread,
    ) -> Result<ThreadId, SchedError> {
        if self.process(pid).is_none() {
            return Err(SchedError::InvalidProcessId(pid));
        }
        if !self.has_thread_capacity(pid) {
            return Err(SchedError::TooManyThreads);
        }
        let tid = self
            .threads
            .insert_with_handle(|h| make(ThreadId(h)))
            .map(ThreadId)
            .ok_or(SchedError::TooManyThreads)?;
        self.process_mut(pid)
            .ok_or(SchedError::InvalidProcessId(pid))?
            .threads
            .try_push(tid)
            .map_err(|_| SchedError::TooManyThreads)?;
        Ok(tid)
    }

    /// `StartingUp → Ready`. Other states are left alone.
    ///
    /// # Errors
    /// [`SchedError::InvalidThreadId`] for an unknown thread.
    pub fn launch(&mut self, tid: ThreadId) -> Result<(), SchedError> {
        let thread = self.thread_mut(tid).ok_or(SchedError::InvalidThreadId(tid))?;
        if thread.status == ThreadStatus::StartingUp {
            thread.status = ThreadStatus::Ready;
        }
        Ok(())
    }

    /// First phase of termination: `pid` and all its threads stop being
    /// schedulable. No memory is touched.
    ///
    /// # Errors
    /// [`SchedError::InvalidProcessId`] for process 0 or an unknown process.
    pub fn terminate_start(&mut self, pid: ProcessId) -> Result<(), SchedError> {
        if pid.is_kernel() {
            return Err(SchedError::InvalidProcessId(pid));
        }
        let process = self
            .processes
            .get_mut(pid.0)
            .ok_or(SchedError::InvalidProcessId(pid))?;
        process.terminating = true;
        for tid in &process.threads {
            if let Some(thread) = self.threads.get_mut(tid.0) {
                thread.status = ThreadStatus::Dead;
            }
        }
        debug!("Process {pid} terminating");
        Ok(())
    }

    /// Removes a thread from the table. Its process keeps no reference.
    pub fn remove_thread(&mut self, tid: ThreadId) -> Option<Thread> {
        let thread = self.threads.remove(tid.0)?;
        if let Some(process) = self.processes.get_mut(thread.process.0) {
            process.threads.retain(|t| *t != tid);
        }
        Some(thread)
    }

    /// Removes a process from the table. Its threads must be gone already.
    pub fn remove_process(&mut self, pid: ProcessId) -> Option<Process<'k>> {
        if pid.is_kernel() {
            return None;
        }
        self.processes.remove(pid.0)
    }

    /// Next `Ready` non-idle thread after the running one, in table order.
    fn next_ready(&self) -> Option<ThreadId> {
        let start = self.current.index() + 1;
        (0..MAX_THREADS)
            .map(|step| (start + step) % MAX_THREADS)
            .filter_map(|index| self.threads.handle_at(index))
            .map(ThreadId)
            .filter(|&tid| tid != self.idle)
            .find(|&tid| self.thread(tid).is_some_and(Thread::is_schedulable))
    }

    /// Timer and yield path.
    ///
    /// Saves `saved` into the running thread and loads the next one into it.
    /// Returns the new thread's kernel stack top, or `None` if the running
    /// thread keeps the CPU (and `saved` is untouched).
    pub fn schedule(&mut self, saved: &mut CpuContext) -> Option<VirtualAddress> {
        if self.processes.len() == 1 {
            return None;
        }

        let current_can_run = self
            .thread(self.current)
            .is_some_and(|t| t.status == ThreadStatus::Running);
        let next = match self.next_ready() {
            Some(next) => next,
            None if current_can_run => return None,
            None => self.idle,
        };
        if next == self.current {
            return None;
        }

        if let Some(previous) = self.threads.get_mut(self.current.0) {
            previous.context = *saved;
            if previous.status == ThreadStatus::Running {
                previous.status = ThreadStatus::Ready;
            }
        }
        self.load(next, saved)
    }

    /// Exception-return path: the running thread is gone, so `saved` is
    /// overwritten without being stored.
    pub fn schedule_discard(&mut self, saved: &mut CpuContext) -> VirtualAddress {
        let next = self.next_ready().unwrap_or(self.idle);
        self.load(next, saved).unwrap_or_else(|| self.idle_stack_top())
    }

    fn load(&mut self, next: ThreadId, saved: &mut CpuContext) -> Option<VirtualAddress> {
        let thread = self.threads.get_mut(next.0)?;
        thread.status = ThreadStatus::Running;
        *saved = thread.context;
        let top = thread.kernel_stack_top;
        trace!("Switching {} -> {} (process {})", self.current, next, thread.process);
        self.current = next;
        Some(top)
    }

    fn idle_stack_top(&self) -> VirtualAddress {
        self.thread(self.idle)
            .map_or(VirtualAddress::zero(), |t| t.kernel_stack_top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::Extent;
    use kernel_memory_addresses::PhysicalAddress;

    fn root(n: u64) -> PhysicalPage<Size4K> {
        PhysicalAddress::new(n * 0x1000).page()
    }

    fn user_thread(sched: &mut Scheduler<'_>, pid: ProcessId, stack_top: u64) -> ThreadId {
        let cr3 = sched.process(pid).unwrap().root;
        let tid = sched
            .add_thread(pid, |id| Thread {
                id,
                process: pid,
                status: ThreadStatus::StartingUp,
                context: CpuContext::user_entry(
                    cr3,
                    VirtualAddress::new(0x40_0000),
                    VirtualAddress::new(0x7000_0000),
                ),
                user_stack: Some(Extent::new(VirtualAddress::new(0x6fff_0000), 0x1_0000)),
                kernel_stack: None,
                kernel_stack_top: VirtualAddress::new(stack_top),
            })
            .unwrap();
        sched.launch(tid).unwrap();
        tid
    }

    fn process(sched: &mut Scheduler<'_>, n: u64) -> ProcessId {
        sched.add_process(|id| Process::new(id, root(n), None)).unwrap()
    }

    #[test]
    fn only_kernel_process_never_switches() {
        let mut sched = Scheduler::new(root(1), VirtualAddress::new(0xdead_0000)).unwrap();
        let mut saved = CpuContext::default();
        assert_eq!(sched.schedule(&mut saved), None);
        assert_eq!(sched.current(), sched.idle());
        assert_eq!(sched.current_process(), ProcessId::KERNEL);
    }

    #[test]
    fn starting_up_threads_are_not_picked() {
        let mut sched = Scheduler::new(root(1), VirtualAddress::new(0xdead_0000)).unwrap();
        let pid = process(&mut sched, 2);
        let tid = user_thread(&mut sched, pid, 0xa000);
        sched.thread_mut(tid).unwrap().status = ThreadStatus::StartingUp;

        let mut saved = CpuContext::default();
        assert_eq!(sched.schedule(&mut saved), None);
        sched.launch(tid).unwrap();
        assert_eq!(sched.schedule(&mut saved), Some(VirtualAddress::new(0xa000)));
        assert_eq!(saved.cr3, 0x2000);
    }

    #[test]
    fn yielding_alone_keeps_the_cpu() {
        let mut sched = Scheduler::new(root(1), VirtualAddress::new(0xdead_0000)).unwrap();
        let pid = process(&mut sched, 2);
        let tid = user_thread(&mut sched, pid, 0xa000);

        let mut saved = CpuContext::default();
        sched.schedule(&mut saved).unwrap();
        assert_eq!(sched.current(), tid);

        saved.rbx = 7;
        assert_eq!(sched.schedule(&mut saved), None);
        assert_eq!(saved.rbx, 7);
        assert_eq!(sched.thread(tid).unwrap().status, ThreadStatus::Running);
    }

    #[test]
    fn dead_thread_falls_back_to_idle() {
        let mut sched = Scheduler::new(root(1), VirtualAddress::new(0xdead_0000)).unwrap();
        let pid = process(&mut sched, 2);
        user_thread(&mut sched, pid, 0xa000);

        let mut saved = CpuContext::default();
        saved.frame.rip = 0x1234;
        sched.schedule(&mut saved).unwrap();
        sched.terminate_start(pid).unwrap();

        let top = sched.schedule_discard(&mut saved);
        assert_eq!(top, VirtualAddress::new(0xdead_0000));
        assert_eq!(sched.current(), sched.idle());
        assert_eq!(saved.frame.rip, 0x1234, "idle context restored");
    }

    #[test]
    fn stale_ids_are_rejected() {
        let mut sched = Scheduler::new(root(1), VirtualAddress::new(0)).unwrap();
        let pid = process(&mut sched, 2);
        let tid = user_thread(&mut sched, pid, 0xa000);
        sched.terminate_start(pid).unwrap();
        sched.remove_thread(tid).unwrap();
        sched.remove_process(pid).unwrap();

        let again = process(&mut sched, 3);
        assert_eq!(again.index(), pid.index());
        assert_eq!(sched.terminate_start(pid), Err(SchedError::InvalidProcessId(pid)));
        assert_eq!(sched.launch(tid), Err(SchedError::InvalidThreadId(tid)));
        assert!(sched.remove_process(ProcessId::KERNEL).is_none());
    }
}
