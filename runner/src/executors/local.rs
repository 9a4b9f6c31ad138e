use super::{ActiveJobs, ExecutorError, Outcome};
use crate::{
    backoff::Backoff,
    builder::BuildCache,
    collector::RunDirectory,
    config::{ConfigErrors, ExecutorConfig, RunnerConfig},
    jobs::{Job, LocalJob},
    shutdown::ShutdownHandle,
};
use std::{fs, path::PathBuf, time::Duration};
use tracing::{debug, info, instrument};

/// Executor that runs every repetition as a local process
#[derive(Debug)]
pub struct LocalExecutor {
    wrapper: PathBuf,
    // total task slots, `None` runs one job at a time
    budget: Option<usize>,
    builds: BuildCache,
    active: ActiveJobs,
    poll_unit: Duration,
    shutdown: ShutdownHandle,
}

impl LocalExecutor {
    /// create a new LocalExecutor instance
    pub fn load(config: &RunnerConfig, shutdown: ShutdownHandle) -> Result<Self, ConfigErrors> {
        let ExecutorConfig::Local { wrapper, budget } = &config.executor else {
            return Err(ConfigErrors::UnsupportedExecutor("local"));
        };

        // the wrapper is started from the binary's directory
        let wrapper = fs::canonicalize(wrapper).map_err(|source| ConfigErrors::ReadFailed {
            path: wrapper.clone(),
            source,
        })?;

        Ok(Self {
            wrapper,
            budget: *budget,
            builds: BuildCache::new(config.build.clone()),
            active: ActiveJobs::new(shutdown.clone()),
            poll_unit: config.poll_unit(),
            shutdown,
        })
    }

    /// Run all repetitions of all run directories and wait for them
    #[instrument(skip_all, level = "info")]
    pub fn execute(&mut self, runs: &[RunDirectory]) -> Result<Outcome, ExecutorError> {
        let result = self.dispatch(runs);

        self.active.settle(result, ActiveJobs::wait_all)
    }

    fn dispatch(&mut self, runs: &[RunDirectory]) -> Result<Outcome, ExecutorError> {
        if let Some(budget) = self.budget {
            // such a run would wait for slots forever
            if let Some(run) = runs.iter().find(|run| run.request.task_count > budget) {
                return Err(ExecutorError::ExceedsBudget {
                    run: run.name(),
                    task_count: run.request.task_count,
                    budget,
                });
            }
        }

        let total: usize = runs.iter().map(|run| run.request.repeat_count).sum();
        let mut dispatched = 0;

        for run in runs {
            if self.shutdown.should_shutdown() {
                return Ok(Outcome::Interrupted);
            }

            self.builds.ensure_built(&run.request.binary)?;
            run.clean()?;

            for repetition in 0..run.request.repeat_count {
                if self.shutdown.should_shutdown() {
                    return Ok(Outcome::Interrupted);
                }

                self.make_room(run.request.task_count)?;

                // the wait above may have been interrupted
                if self.shutdown.should_shutdown() {
                    return Ok(Outcome::Interrupted);
                }

                let job = LocalJob::spawn(&self.wrapper, run, repetition, &self.shutdown)?;
                dispatched += 1;
                info!(
                    run = %run.name(),
                    repetition,
                    pid = job.pid(),
                    "Dispatched {dispatched}/{total}"
                );

                self.active.push(Job::Local(job));
            }
        }

        Ok(Outcome::Completed)
    }

    /// sequential mode drains every active job, budget mode waits for free slots
    fn make_room(&mut self, task_count: usize) -> Result<(), ExecutorError> {
        match self.budget {
            None => {
                if !self.active.is_empty() {
                    debug!("Waiting for {} active jobs", self.active.len());
                }
                self.active.wait_all()
            }
            Some(budget) => {
                if self.active.task_slots() + task_count > budget {
                    debug!(
                        used = self.active.task_slots(),
                        budget, "Task slots exhausted, waiting"
                    );
                }
                let mut backoff = Backoff::new(self.poll_unit);
                self.active.wait_for_slots(task_count, budget, &mut backoff)
            }
        }
    }
}
