mod common;

use common::{DebugPort, IDLE_STACK_TOP, spawn, switch, with_kernel};
use kernel_memory_addresses::VirtualAddress;
use kernel_sched::{CpuContext, TrapOutcome, handle_exception};

#[test]
fn debug_write_returns_to_the_caller() {
    with_kernel(1024, true, |_, kernel| {
        let pid = spawn(kernel);
        let mut saved = CpuContext::default();
        switch(kernel, &mut saved);

        let mut port = DebugPort::default();
        for byte in *b"hi" {
            saved.rax = 1;
            saved.rdi = u64::from(byte);
            assert_eq!(kernel.handle_syscall(&mut saved, &mut port), None);
            assert_eq!(saved.rax, 0);
        }
        assert_eq!(port.0, b"hi");
        assert_eq!(kernel.scheduler.current_process(), pid);
    });
}

#[test]
fn unknown_syscall_reports_an_error() {
    with_kernel(1024, true, |_, kernel| {
        spawn(kernel);
        let mut saved = CpuContext::default();
        switch(kernel, &mut saved);

        saved.rax = 7;
        assert_eq!(kernel.handle_syscall(&mut saved, &mut DebugPort::default()), None);
        assert_eq!(saved.rax, u64::MAX);
    });
}

#[test]
fn yield_hands_over_and_returns_zero_later() {
    with_kernel(1024, true, |_, kernel| {
        let a = spawn(kernel);
        let b = spawn(kernel);
        let mut saved = CpuContext::default();
        assert_eq!(switch(kernel, &mut saved), a);

        saved.rax = 2;
        let top = kernel.handle_syscall(&mut saved, &mut DebugPort::default());
        assert!(top.is_some());
        assert_eq!(kernel.scheduler.current_process(), b);

        assert_eq!(switch(kernel, &mut saved), a);
        assert_eq!(saved.rax, 0, "yield result is saved with the context");
    });
}

#[test]
fn terminate_syscall_discards_the_caller() {
    with_kernel(1024, true, |_, kernel| {
        let a = spawn(kernel);
        let b = spawn(kernel);
        let mut saved = CpuContext::default();
        assert_eq!(switch(kernel, &mut saved), a);

        saved.rax = 0;
        assert!(kernel.handle_syscall(&mut saved, &mut DebugPort::default()).is_some());
        assert_eq!(kernel.scheduler.current_process(), b);
        assert!(kernel.scheduler.process(a).unwrap().terminating);

        assert_eq!(kernel.reap(), 1);
        assert!(kernel.scheduler.process(a).is_none());
    });
}

#[test]
fn user_fault_terminates_the_process() {
    with_kernel(1024, true, |_, kernel| {
        let pid = spawn(kernel);
        let mut saved = CpuContext::default();
        switch(kernel, &mut saved);

        saved.vector = 14;
        saved.error_code = 0b110;
        let outcome = handle_exception(kernel, &mut saved, 0xdead_b000);
        assert_eq!(outcome, TrapOutcome::Switched(VirtualAddress::new(IDLE_STACK_TOP)));
        assert!(kernel.scheduler.process(pid).unwrap().terminating);
        assert_eq!(kernel.reap(), 1);
    });
}

#[test]
fn kernel_fault_halts() {
    with_kernel(512, true, |_, kernel| {
        let mut saved = CpuContext {
            vector: 13,
            ..CpuContext::default()
        };
        assert_eq!(handle_exception(kernel, &mut saved, 0), TrapOutcome::Halt);

        saved.vector = 0x42;
        assert_eq!(handle_exception(kernel, &mut saved, 0), TrapOutcome::Halt);
    });
}

#[test]
fn breakpoint_resumes() {
    with_kernel(1024, true, |_, kernel| {
        let pid = spawn(kernel);
        let mut saved = CpuContext::default();
        switch(kernel, &mut saved);

        saved.vector = 3;
        let before = saved;
        assert_eq!(handle_exception(kernel, &mut saved, 0), TrapOutcome::Resume);
        assert_eq!(saved, before);
        assert!(!kernel.scheduler.process(pid).unwrap().terminating);
    });
}
