use nix::{
    errno::Errno,
    sys::signal::{killpg, SigSet, Signal},
    unistd::Pid,
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};
use tracing::{debug, error, warn};

/// Cooperative cancellation, checked by the schedulers before every dispatch.
///
/// The first interrupt stops dispatching, the second one aborts: every tracked
/// process group is killed and waits return `ExecutorError::Aborted`.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    interrupts: Arc<AtomicUsize>,
    // process groups of running local jobs
    groups: Arc<Mutex<Vec<i32>>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        let previous = self.interrupts.fetch_add(1, Ordering::SeqCst);

        if previous >= 1 {
            self.kill_groups();
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst) >= 1
    }

    pub fn should_abort(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst) >= 2
    }

    pub fn track(&self, group: i32) {
        self.groups.lock().push(group);
    }

    pub fn untrack(&self, group: i32) {
        self.groups.lock().retain(|tracked| *tracked != group);
    }

    pub fn tracked(&self) -> Vec<i32> {
        self.groups.lock().clone()
    }

    fn kill_groups(&self) {
        for group in self.tracked() {
            match killpg(Pid::from_raw(group), Signal::SIGKILL) {
                Ok(()) => warn!(group, "Killed process group"),
                // already gone
                Err(Errno::ESRCH) => debug!(group, "Process group already exited"),
                Err(e) => error!(group, "Failed to kill process group: {e}"),
            }
        }
    }
}

/// Route SIGINT into a `ShutdownHandle`.
///
/// Must run before any other thread is started: the signal is blocked for the
/// calling thread (and inherited by later threads) and only received by the
/// listener through `sigwait`. Local jobs run in their own process group, so a
/// terminal interrupt reaches only this process.
pub fn start_interrupt_listener() -> Result<ShutdownHandle, nix::Error> {
    let handle = ShutdownHandle::new();

    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.thread_block()?;

    let listener = handle.clone();
    let wait_mask = mask.clone();
    let spawned = thread::Builder::new()
        .name("interrupt-listener".to_owned())
        .spawn(move || loop {
            match wait_mask.wait() {
                Ok(signal) if !listener.should_shutdown() => {
                    warn!("Received {signal}, no new jobs will be dispatched, interrupt again to abort");
                    listener.shutdown();
                }
                Ok(signal) => {
                    error!("Received {signal} again, killing active jobs");
                    listener.shutdown();
                }
                Err(e) => {
                    error!("Failed to wait for interrupt: {e}");
                    break;
                }
            }
        });

    if let Err(e) = spawned {
        error!("Failed to start interrupt listener: {e}");
        mask.thread_unblock()?;
    }

    Ok(handle)
}
