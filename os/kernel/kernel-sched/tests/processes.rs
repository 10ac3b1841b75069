mod common;

use common::{ENTRY, IDLE_STACK_TOP, spawn, switch, with_kernel};
use kernel_alloc::VmError;
use kernel_info::memory::{MAX_SEGMENTS_PER_PROCESS, USER_STACK_SIZE, USER_STACK_TOP};
use kernel_memory_addresses::VirtualAddress;
use kernel_sched::{CpuContext, ProcessId, SchedError, ThreadStatus};
use kernel_vmem::{KERNEL_HALF_FIRST_INDEX, PageFlags};

fn va(v: u64) -> VirtualAddress {
    VirtualAddress::new(v)
}

#[test]
fn new_process_is_ready_with_its_own_address_space() {
    with_kernel(1024, true, |_, kernel| {
        let pid = spawn(kernel);
        let process = kernel.scheduler.process(pid).unwrap();
        let tid = process.threads[0];
        let thread = kernel.scheduler.thread(tid).unwrap();

        assert_eq!(thread.status, ThreadStatus::Ready);
        assert_eq!(thread.context.cr3, process.root.base().as_u64());
        assert_eq!(thread.context.frame.rip, ENTRY);
        assert_eq!(thread.context.frame.rsp, USER_STACK_TOP);
        assert_eq!(thread.context.frame.rflags, 0x202);
        assert_eq!(thread.kernel_stack_top, thread.kernel_stack.unwrap().end());

        let space = kernel.memory.space(process.root);
        let kernel_space = kernel.memory.space(kernel.kernel_vm.root());
        for index in KERNEL_HALF_FIRST_INDEX..512 {
            assert_eq!(
                space.pml4_entry(index).address(),
                kernel_space.pml4_entry(index).address()
            );
        }
        // The stack is mapped in the process and nowhere else.
        let top_page = va(USER_STACK_TOP - 0x1000);
        assert!(space.translate(top_page).is_ok());
        assert!(kernel_space.translate(top_page).is_err());
        assert!(space.translate(va(USER_STACK_TOP - USER_STACK_SIZE - 0x1000)).is_err());
        // The kernel stack is visible through the shared half.
        assert!(space.translate(thread.kernel_stack.unwrap().begin).is_ok());
    });
}

#[test]
fn terminate_start_only_marks() {
    with_kernel(1024, true, |_, kernel| {
        let pid = spawn(kernel);
        let root = kernel.scheduler.process(pid).unwrap().root;
        let free = kernel.memory.frames.free_frames();

        kernel.terminate_start(pid).unwrap();

        assert_eq!(kernel.memory.frames.free_frames(), free);
        assert!(kernel.memory.frames.is_allocated(root));
        let process = kernel.scheduler.process(pid).unwrap();
        assert!(process.terminating);
        for tid in &process.threads {
            assert_eq!(kernel.scheduler.thread(*tid).unwrap().status, ThreadStatus::Dead);
        }

        let mut saved = CpuContext::default();
        assert_eq!(kernel.schedule(&mut saved), None, "dead threads are never picked");
        assert_eq!(kernel.scheduler.current(), kernel.scheduler.idle());
    });
}

#[test]
fn two_ready_threads_alternate() {
    with_kernel(1024, true, |_, kernel| {
        let a = spawn(kernel);
        let b = spawn(kernel);
        let mut saved = CpuContext::default();

        assert_eq!(switch(kernel, &mut saved), a);
        let cr3_a = saved.cr3;
        saved.rbx = 0xaaaa;

        assert_eq!(switch(kernel, &mut saved), b);
        assert_ne!(saved.cr3, cr3_a);
        assert_eq!(saved.rbx, 0);
        saved.rbx = 0xbbbb;

        assert_eq!(switch(kernel, &mut saved), a);
        assert_eq!(saved.cr3, cr3_a);
        assert_eq!(saved.rbx, 0xaaaa, "registers survive the round trip");

        assert_eq!(switch(kernel, &mut saved), b);
        assert_eq!(saved.rbx, 0xbbbb);
    });
}

#[test]
fn idle_runs_only_without_ready_threads() {
    with_kernel(1024, true, |_, kernel| {
        let a = spawn(kernel);
        let mut saved = CpuContext::default();
        assert_eq!(switch(kernel, &mut saved), a);

        // Alone and still running: keep going.
        assert_eq!(kernel.schedule(&mut saved), None);
        assert_eq!(kernel.scheduler.current_process(), a);

        let top = kernel.terminate_current(&mut saved).unwrap();
        assert_eq!(top, va(IDLE_STACK_TOP));
        assert_eq!(kernel.scheduler.current(), kernel.scheduler.idle());
    });
}

#[test]
fn kernel_process_is_protected() {
    with_kernel(512, true, |_, kernel| {
        let kernel_pid = ProcessId::KERNEL;
        let invalid = Err(SchedError::InvalidProcessId(kernel_pid));
        assert_eq!(kernel.terminate_start(kernel_pid), invalid);
        assert_eq!(kernel.terminate_finish(kernel_pid), invalid);
        assert_eq!(kernel.delete_process(kernel_pid), invalid);
        assert!(kernel.spawn_thread(kernel_pid, va(ENTRY)).is_err());

        let mut saved = CpuContext::default();
        assert!(kernel.terminate_current(&mut saved).is_err());
        assert_eq!(kernel.scheduler.process_count(), 1);
    });
}

#[test]
fn finish_requires_start_and_an_idle_process() {
    with_kernel(1024, true, |_, kernel| {
        let pid = spawn(kernel);
        assert_eq!(kernel.terminate_finish(pid), Err(SchedError::NotTerminated(pid)));

        let mut saved = CpuContext::default();
        assert_eq!(switch(kernel, &mut saved), pid);
        assert_eq!(kernel.delete_process(pid), Err(SchedError::ProcessRunning(pid)));
        assert!(!kernel.scheduler.process(pid).unwrap().terminating);

        kernel.terminate_start(pid).unwrap();
        assert_eq!(kernel.terminate_finish(pid), Err(SchedError::ProcessRunning(pid)));
        assert_eq!(kernel.reap(), 0);

        kernel.schedule_discard(&mut saved);
        assert_eq!(kernel.reap(), 1);
        assert!(kernel.scheduler.process(pid).is_none());
        assert_eq!(kernel.scheduler.thread_count(), 1);
    });
}

#[test]
fn teardown_returns_every_process_frame() {
    with_kernel(1024, false, |_, kernel| {
        // The first process also creates kernel-half tables for its kernel
        // stack. Those are shared and stay.
        let warmup = spawn(kernel);
        kernel.delete_process(warmup).unwrap();
        let baseline = kernel.memory.frames.free_frames();
        let kernel_free = kernel.kernel_vm.free_bytes();

        let pid = spawn(kernel);
        kernel.spawn_thread(pid, va(ENTRY + 0x10)).unwrap();
        kernel
            .load_segment(pid, va(ENTRY), &[0x90; 5000], PageFlags::USER_CODE)
            .unwrap();
        assert!(kernel.memory.frames.free_frames() < baseline);

        kernel.delete_process(pid).unwrap();
        assert_eq!(kernel.memory.frames.free_frames(), baseline);
        assert_eq!(kernel.kernel_vm.free_bytes(), kernel_free);
        assert!(kernel.scheduler.process(pid).is_none());
        assert_eq!(kernel.spawn_thread(pid, va(ENTRY)), Err(SchedError::InvalidProcessId(pid)));
    });
}

#[test]
fn process_table_has_a_fixed_capacity() {
    with_kernel(4096, true, |_, kernel| {
        let mut pids = Vec::new();
        while kernel.scheduler.has_process_capacity() {
            pids.push(spawn(kernel));
        }
        assert_eq!(pids.len(), 15);
        assert_eq!(kernel.create_process(va(ENTRY)), Err(SchedError::TooManyProcesses));

        kernel.delete_process(pids[3]).unwrap();
        let again = spawn(kernel);
        assert_ne!(again, pids[3], "a reused slot gets a new id");
    });
}

#[test]
fn thread_limit_per_process() {
    with_kernel(1024, true, |_, kernel| {
        let pid = spawn(kernel);
        let main = kernel.scheduler.process(pid).unwrap().threads[0];
        let mut stacks = vec![kernel.scheduler.thread(main).unwrap().user_stack.unwrap()];
        for i in 0..3 {
            let tid = kernel.spawn_thread(pid, va(ENTRY + i)).unwrap();
            stacks.push(kernel.scheduler.thread(tid).unwrap().user_stack.unwrap());
        }
        assert_eq!(kernel.spawn_thread(pid, va(ENTRY)), Err(SchedError::TooManyThreads));

        for (i, a) in stacks.iter().enumerate() {
            for b in &stacks[i + 1..] {
                assert!(a.end() <= b.begin || b.end() <= a.begin, "{a:?} overlaps {b:?}");
            }
        }
    });
}

#[test]
fn segments_are_copied_into_the_process() {
    with_kernel(1024, true, |ram, kernel| {
        let pid = spawn(kernel);
        let code: Vec<u8> = (0..=255).cycle().take(4200).collect();
        let segment = kernel
            .load_segment(pid, va(ENTRY + 0x10), &code, PageFlags::USER_CODE)
            .unwrap();
        assert_eq!(segment.begin, va(ENTRY));
        assert_eq!(segment.size, 0x2000);

        let space = kernel.memory.space(kernel.scheduler.process(pid).unwrap().root);
        let first = space.translate(va(ENTRY + 0x10)).unwrap();
        assert_eq!(ram.read(first, 4096 - 0x10), &code[..4096 - 0x10]);
        let second = space.translate(va(ENTRY + 0x1000)).unwrap();
        assert_eq!(ram.read(second, 4200 - (4096 - 0x10)), &code[4096 - 0x10..]);
        assert_eq!(ram.read(space.translate(va(ENTRY)).unwrap(), 0x10), vec![0; 0x10]);

        assert_eq!(
            kernel.load_segment(pid, va(ENTRY + 0x1800), &[1], PageFlags::USER_CODE),
            Err(SchedError::Vm(VmError::NotFound))
        );
        assert_eq!(
            kernel.load_segment(pid, va(0xffff_8000_0000_0000), &[1], PageFlags::USER_CODE),
            Err(SchedError::Vm(VmError::NotFound))
        );
    });
}

#[test]
fn segment_slots_are_limited() {
    with_kernel(1024, true, |_, kernel| {
        let pid = spawn(kernel);
        for i in 0..MAX_SEGMENTS_PER_PROCESS as u64 {
            kernel
                .load_segment(pid, va(0x1000_0000 + i * 0x1000), &[0xc3], PageFlags::USER_CODE)
                .unwrap();
        }
        assert_eq!(
            kernel.load_segment(pid, va(0x2000_0000), &[0xc3], PageFlags::USER_CODE),
            Err(SchedError::TooManySegments(pid))
        );
    });
}
