use crate::{
    backoff::Backoff,
    batch::{BatchSystem, QueueStatus},
    collector::RunDirectory,
    executors::ExecutorError,
    shutdown::ShutdownHandle,
};
use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use std::{
    io,
    os::unix::process::CommandExt,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info, warn};

/// A run launched as a local process through the wrapper script.
/// The wrapper leads its own process group, which is killed as a whole.
#[derive(Debug)]
pub struct LocalJob {
    label: String,
    task_count: usize,
    child: Child,
    shutdown: ShutdownHandle,
}

impl LocalJob {
    /// `wrapper binary parameter_file log_file task_count`, inside the binary's directory
    pub fn spawn(
        wrapper: &Path,
        run: &RunDirectory,
        repetition: usize,
        shutdown: &ShutdownHandle,
    ) -> Result<Self, ExecutorError> {
        let request = &run.request;
        let directory = request
            .binary
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let child = Command::new(wrapper)
            .arg(&request.binary)
            .arg(&run.config)
            .arg(run.log_path(repetition))
            .arg(request.task_count.to_string())
            .current_dir(directory)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                command: wrapper.to_string_lossy().into_owned(),
                source,
            })?;

        let job = Self {
            label: format!("{}#{repetition}", run.name()),
            task_count: request.task_count,
            child,
            shutdown: shutdown.clone(),
        };
        shutdown.track(job.group());

        Ok(job)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    // the wrapper's pid doubles as its process group id
    fn group(&self) -> i32 {
        self.child.id() as i32
    }

    fn poll(&mut self) -> Result<bool, ExecutorError> {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.report(status);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(source) => Err(ExecutorError::Wait {
                job: self.label.clone(),
                source,
            }),
        }
    }

    fn wait(&mut self) -> Result<(), ExecutorError> {
        let status = self.child.wait().map_err(|source| ExecutorError::Wait {
            job: self.label.clone(),
            source,
        })?;
        self.report(status);

        Ok(())
    }

    fn kill(&mut self) -> Result<(), ExecutorError> {
        match killpg(Pid::from_raw(self.group()), Signal::SIGKILL) {
            // already exited
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => {
                return Err(ExecutorError::Kill {
                    job: self.label.clone(),
                    source: io::Error::from_raw_os_error(errno as i32),
                })
            }
        }

        let _ = self.child.wait();
        self.shutdown.untrack(self.group());

        Ok(())
    }

    fn report(&self, status: ExitStatus) {
        self.shutdown.untrack(self.group());

        if status.success() {
            debug!(job = %self.label, "Finished");
        } else {
            warn!(job = %self.label, "Finished with {status}");
        }
    }
}

/// A chunk submitted to the batch system, known only by its job id
#[derive(Debug)]
pub struct ClusterJob {
    id: String,
    nodes: usize,
    batch: Arc<dyn BatchSystem>,
    poll_unit: Duration,
}

impl ClusterJob {
    pub fn submit(
        batch: Arc<dyn BatchSystem>,
        script: &Path,
        nodes: usize,
        poll_unit: Duration,
    ) -> Result<Self, ExecutorError> {
        let id = batch.submit(script)?;
        info!(job = %id, nodes, script = ?script, "Submitted batch job");

        Ok(Self {
            id,
            nodes,
            batch,
            poll_unit,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn poll(&mut self) -> Result<bool, ExecutorError> {
        let status = self.batch.status(&self.id)?;

        match &status {
            QueueStatus::Pending => info!(job = %self.id, "Job still pending..."),
            QueueStatus::Unknown => warn!(job = %self.id, "Could not read queue status"),
            _ => debug!(job = %self.id, "Queue status {status:?}"),
        }

        Ok(status.is_finished())
    }

    fn wait(&mut self, shutdown: &ShutdownHandle) -> Result<(), ExecutorError> {
        let mut backoff = Backoff::new(self.poll_unit);

        while !self.poll()? {
            if shutdown.should_abort() {
                return Err(ExecutorError::Aborted);
            }
            backoff.wait_unless(|| shutdown.should_abort());
        }

        Ok(())
    }

    fn kill(&mut self) -> Result<(), ExecutorError> {
        self.batch.cancel(&self.id)
    }
}

/// Shared capabilities of a dispatched job, whatever runs it
#[derive(Debug)]
pub enum Job {
    Local(LocalJob),
    Cluster(ClusterJob),
}

impl Job {
    /// task slots accounted against a local budget; cluster jobs hold whole nodes
    pub fn task_slots(&self) -> usize {
        match self {
            Self::Local(job) => job.task_count,
            Self::Cluster(job) => job.nodes,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Local(job) => &job.label,
            Self::Cluster(job) => &job.id,
        }
    }

    /// non-blocking, true once the job has finished
    pub fn poll(&mut self) -> Result<bool, ExecutorError> {
        match self {
            Self::Local(job) => job.poll(),
            Self::Cluster(job) => job.poll(),
        }
    }

    /// block until the job finished; cluster jobs give up once `shutdown` aborts,
    /// local ones are released by their process group being killed
    pub fn wait(&mut self, shutdown: &ShutdownHandle) -> Result<(), ExecutorError> {
        match self {
            Self::Local(job) => job.wait(),
            Self::Cluster(job) => job.wait(shutdown),
        }
    }

    pub fn kill(&mut self) -> Result<(), ExecutorError> {
        match self {
            Self::Local(job) => job.kill(),
            Self::Cluster(job) => job.kill(),
        }
    }
}
