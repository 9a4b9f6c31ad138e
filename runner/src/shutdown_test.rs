use crate::shutdown::ShutdownHandle;
use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use std::{
    os::unix::process::{CommandExt, ExitStatusExt},
    process::{Child, Command, Stdio},
};

fn sleeper() -> Child {
    Command::new("sh")
        .args(["-c", "sleep 30 & wait"])
        .stdin(Stdio::null())
        .process_group(0)
        .spawn()
        .unwrap()
}

#[test]
pub fn second_interrupt_aborts() {
    let shutdown = ShutdownHandle::new();
    let listener = shutdown.clone();
    assert!(!shutdown.should_shutdown());

    listener.shutdown();
    assert!(shutdown.should_shutdown());
    assert!(!shutdown.should_abort());

    listener.shutdown();
    assert!(shutdown.should_abort());
}

#[test]
pub fn abort_kills_tracked_process_groups() {
    let mut child = sleeper();
    let shutdown = ShutdownHandle::new();
    shutdown.track(child.id() as i32);

    shutdown.shutdown();
    assert!(child.try_wait().unwrap().is_none());

    shutdown.shutdown();
    assert_eq!(child.wait().unwrap().signal(), Some(Signal::SIGKILL as i32));
}

#[test]
pub fn untracked_groups_survive_abort() {
    let mut child = sleeper();
    let shutdown = ShutdownHandle::new();
    shutdown.track(child.id() as i32);
    shutdown.untrack(child.id() as i32);
    assert!(shutdown.tracked().is_empty());

    shutdown.shutdown();
    shutdown.shutdown();
    assert!(child.try_wait().unwrap().is_none());

    killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL).unwrap();
    child.wait().unwrap();
}
