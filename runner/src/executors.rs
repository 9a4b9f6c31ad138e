pub mod chunks;
pub mod local;
pub mod slurm;

#[cfg(test)]
mod chunks_test;
#[cfg(test)]
mod slurm_test;

use crate::{
    backoff::Backoff,
    collector::RunDirectory,
    config::{ConfigErrors, ExecutorConfig, RunnerConfig},
    jobs::Job,
    shutdown::ShutdownHandle,
};
use std::{io, path::PathBuf, process::ExitStatus};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("Build in {directory:?} failed with {status}")]
    BuildFailed {
        directory: PathBuf,
        status: ExitStatus,
    },
    #[error("Failed to wait for job {job}: {source}")]
    Wait { job: String, source: io::Error },
    #[error("Failed to kill job {job}: {source}")]
    Kill { job: String, source: io::Error },
    #[error("Submitting {script:?} returned no job id: {output}")]
    Submission { script: PathBuf, output: String },
    #[error("{command} failed: {output}")]
    BatchCommand { command: String, output: String },
    #[error("Multi-node chunks reserve {reserved} of {max_nodes} nodes, no node is left for the remaining runs")]
    NodeBudget { reserved: usize, max_nodes: usize },
    #[error("{run} needs {task_count} task slots but the budget is {budget}")]
    ExceedsBudget {
        run: String,
        task_count: usize,
        budget: usize,
    },
    #[error("Failed to write {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Aborted by a second interrupt")]
    Aborted,
    #[error(transparent)]
    Config(#[from] ConfigErrors),
}

/// How an execution ended when no error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// stopped dispatching after an interrupt, already running jobs were drained
    Interrupted,
}

/// The jobs dispatched by one scheduler invocation that have not been reaped yet
#[derive(Debug)]
pub struct ActiveJobs {
    jobs: Vec<Job>,
    shutdown: ShutdownHandle,
}

impl ActiveJobs {
    pub fn new(shutdown: ShutdownHandle) -> Self {
        Self {
            jobs: Vec::new(),
            shutdown,
        }
    }

    pub fn push(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn task_slots(&self) -> usize {
        self.jobs.iter().map(Job::task_slots).sum()
    }

    /// poll every job once and drop the finished ones
    pub fn reap(&mut self) -> Result<usize, ExecutorError> {
        let before = self.jobs.len();
        let mut index = 0;

        while index < self.jobs.len() {
            if self.jobs[index].poll()? {
                self.jobs.remove(index);
            } else {
                index += 1;
            }
        }

        Ok(before - self.jobs.len())
    }

    fn check_abort(&self) -> Result<(), ExecutorError> {
        if self.shutdown.should_abort() {
            return Err(ExecutorError::Aborted);
        }

        Ok(())
    }

    /// block on every job in dispatch order
    pub fn wait_all(&mut self) -> Result<(), ExecutorError> {
        while let Some(job) = self.jobs.first_mut() {
            job.wait(&self.shutdown)?;
            self.jobs.remove(0);
            self.check_abort()?;
        }

        Ok(())
    }

    /// poll all jobs with back-off until none is left
    pub fn poll_all(&mut self, backoff: &mut Backoff) -> Result<(), ExecutorError> {
        loop {
            self.reap()?;

            if self.jobs.is_empty() {
                return Ok(());
            }
            self.check_abort()?;

            info!("{} jobs still active", self.jobs.len());
            backoff.wait_unless(|| self.shutdown.should_abort());
        }
    }

    /// Wait until `task_count` more slots fit into `budget`.
    /// Returns early after an interrupt, nothing will be dispatched anymore.
    pub fn wait_for_slots(
        &mut self,
        task_count: usize,
        budget: usize,
        backoff: &mut Backoff,
    ) -> Result<(), ExecutorError> {
        loop {
            self.reap()?;

            if self.task_slots() + task_count <= budget || self.shutdown.should_shutdown() {
                return Ok(());
            }

            backoff.wait_unless(|| self.shutdown.should_shutdown());
        }
    }

    /// force-kill whatever is still active
    pub fn kill_all(&mut self) {
        for mut job in self.jobs.drain(..) {
            match job.kill() {
                Ok(()) => warn!(job = %job.label(), "Killed job"),
                Err(e) => error!(job = %job.label(), "Failed to kill job: {e}"),
            }
        }
    }

    /// After an interrupt: let every active job finish, a second interrupt aborts the wait
    pub fn wind_down(&mut self) -> Result<(), ExecutorError> {
        if !self.jobs.is_empty() {
            warn!(
                "Waiting for {} active jobs to finish, interrupt again to abort",
                self.jobs.len()
            );
        }

        self.wait_all()
    }

    /// Finish an execution: drain on success, wind down after an interrupt,
    /// kill whatever is left on any error
    pub(crate) fn settle(
        &mut self,
        result: Result<Outcome, ExecutorError>,
        drain: impl FnOnce(&mut Self) -> Result<(), ExecutorError>,
    ) -> Result<Outcome, ExecutorError> {
        let settled = match result {
            Ok(Outcome::Completed) => drain(self).map(|()| Outcome::Completed),
            Ok(Outcome::Interrupted) => self.wind_down().map(|()| Outcome::Interrupted),
            Err(e) => Err(e),
        };

        if let Err(e) = &settled {
            error!("Aborting, killing {} active jobs: {e}", self.jobs.len());
            self.kill_all();
        }

        settled
    }
}

#[derive(Debug)]
pub enum Executors {
    Local(local::LocalExecutor),
    Slurm(slurm::SlurmExecutor),
}

impl Executors {
    pub fn load(config: &RunnerConfig, shutdown: ShutdownHandle) -> Result<Self, ConfigErrors> {
        match config.executor {
            ExecutorConfig::Local { .. } => Ok(Self::Local(local::LocalExecutor::load(
                config, shutdown,
            )?)),
            ExecutorConfig::Slurm { .. } => Ok(Self::Slurm(slurm::SlurmExecutor::load(
                config, shutdown,
            )?)),
        }
    }

    pub fn execute(&mut self, runs: &[RunDirectory]) -> Result<Outcome, ExecutorError> {
        match self {
            Self::Local(executor) => executor.execute(runs),
            Self::Slurm(executor) => executor.execute(runs),
        }
    }
}
