use super::{
    chunks::{partition, Chunk, RunInstance},
    ActiveJobs, ExecutorError, Outcome,
};
use crate::{
    backoff::Backoff,
    batch::{BatchSystem, Slurm},
    builder::BuildCache,
    collector::RunDirectory,
    config::{ConfigErrors, ExecutorConfig, LargeJobConfig, RunnerConfig},
    jobs::{ClusterJob, Job},
    shutdown::ShutdownHandle,
};
use itertools::Itertools;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info, instrument};

/// used when no template is configured
pub const DEFAULT_TEMPLATE: &str = "#!/bin/bash
#SBATCH --nodes=__NODES__
#SBATCH --ntasks-per-node=__NTASKS_PER_NODE__
__SBATCH_FLAGS__

__RUNS__
";

/// Executor that partitions runs into chunks and submits each as one batch job
#[derive(Debug)]
pub struct SlurmExecutor {
    cores_per_node: usize,
    max_nodes: usize,
    template: String,
    large_job: Option<LargeJobConfig>,
    job_dir: PathBuf,
    builds: BuildCache,
    active: ActiveJobs,
    poll_unit: Duration,
    shutdown: ShutdownHandle,
    batch: Arc<dyn BatchSystem>,
}

impl SlurmExecutor {
    pub fn load(config: &RunnerConfig, shutdown: ShutdownHandle) -> Result<Self, ConfigErrors> {
        Self::with_batch_system(config, shutdown, Arc::new(Slurm))
    }

    pub fn with_batch_system(
        config: &RunnerConfig,
        shutdown: ShutdownHandle,
        batch: Arc<dyn BatchSystem>,
    ) -> Result<Self, ConfigErrors> {
        let ExecutorConfig::Slurm {
            cores_per_node,
            max_nodes,
            template,
            large_job,
            job_dir,
        } = &config.executor
        else {
            return Err(ConfigErrors::UnsupportedExecutor("slurm"));
        };

        let template = match template {
            Some(path) => fs::read_to_string(path).map_err(|source| ConfigErrors::ReadFailed {
                path: path.clone(),
                source,
            })?,
            None => DEFAULT_TEMPLATE.to_owned(),
        };

        Ok(Self {
            cores_per_node: *cores_per_node,
            max_nodes: *max_nodes,
            template,
            large_job: large_job.clone(),
            job_dir: job_dir.clone(),
            builds: BuildCache::new(config.build.clone()),
            active: ActiveJobs::new(shutdown.clone()),
            poll_unit: config.poll_unit(),
            shutdown,
            batch,
        })
    }

    /// Partition every repetition of every run into chunks, nothing is submitted
    pub fn plan(&self, runs: &[RunDirectory]) -> Result<Vec<Chunk>, ExecutorError> {
        let instances = runs
            .iter()
            .enumerate()
            .flat_map(|(index, run)| {
                (0..run.request.repeat_count).map(move |repetition| RunInstance {
                    run: index,
                    repetition,
                    task_count: run.request.task_count,
                })
            })
            .collect_vec();

        partition(instances, self.cores_per_node, self.max_nodes)
    }

    /// Fill the job script template for one chunk
    pub fn render_script(&self, chunk: &Chunk, runs: &[RunDirectory]) -> String {
        let flags = match &self.large_job {
            Some(large) if chunk.nodes >= large.min_nodes => format!("#SBATCH {}", large.flags),
            _ => String::new(),
        };

        let lines = chunk
            .runs
            .iter()
            .map(|instance| srun_line(&runs[instance.run], instance, chunk.nodes))
            .join("\n");

        self.template
            .replace("__NODES__", &chunk.nodes.to_string())
            .replace("__NTASKS_PER_NODE__", &chunk.tasks_per_node.to_string())
            .replace("__SBATCH_FLAGS__", &flags)
            .replace("__RUNS__", &lines)
    }

    #[instrument(skip_all, level = "info")]
    pub fn execute(&mut self, runs: &[RunDirectory]) -> Result<Outcome, ExecutorError> {
        let result = self.dispatch(runs);
        let mut backoff = Backoff::new(self.poll_unit);

        self.active
            .settle(result, |active| active.poll_all(&mut backoff))
    }

    fn dispatch(&mut self, runs: &[RunDirectory]) -> Result<Outcome, ExecutorError> {
        // a node budget violation aborts before anything is built or submitted
        let chunks = self.plan(runs)?;
        info!("Partitioned runs into {} chunks", chunks.len());

        for run in runs {
            if self.shutdown.should_shutdown() {
                return Ok(Outcome::Interrupted);
            }

            self.builds.ensure_built(&run.request.binary)?;
            run.clean()?;
        }

        fs::create_dir_all(&self.job_dir).map_err(|source| ExecutorError::Io {
            path: self.job_dir.clone(),
            source,
        })?;

        for (index, chunk) in chunks.iter().enumerate() {
            if self.shutdown.should_shutdown() {
                return Ok(Outcome::Interrupted);
            }

            let script = self.job_dir.join(format!("chunk{index}.sh"));
            let contents = self.render_script(chunk, runs);
            fs::write(&script, contents).map_err(|source| ExecutorError::Io {
                path: script.clone(),
                source,
            })?;
            debug!(script = ?script, runs = chunk.runs.len(), "Wrote job script");

            let job = ClusterJob::submit(self.batch.clone(), &script, chunk.nodes, self.poll_unit)?;
            info!(
                job = %job.id(),
                "Submitted chunk {}/{}",
                index + 1,
                chunks.len()
            );

            self.active.push(Job::Cluster(job));
        }

        Ok(Outcome::Completed)
    }
}

fn srun_line(run: &RunDirectory, instance: &RunInstance, nodes: usize) -> String {
    let request = &run.request;
    let directory = request
        .binary
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut line = vec![
        "srun".to_owned(),
        format!("--chdir={}", shell_quote(&directory.to_string_lossy())),
        format!("--nodes={nodes}"),
        format!("--ntasks={}", instance.task_count),
    ];

    if request.cluster.pin_threads {
        line.push("--cpu-bind=cores".to_owned());
    }
    if let Some(frequency) = &request.cluster.cpu_frequency {
        line.push(format!("--cpu-freq={}", shell_quote(frequency)));
    }

    line.push(shell_quote(&request.binary.to_string_lossy()));
    line.push(shell_quote(&run.config.to_string_lossy()));
    line.push(format!(
        "> {} 2>&1",
        shell_quote(&run.log_path(instance.repetition).to_string_lossy())
    ));

    line.join(" ")
}

/// single-quote for sh, keeping plain words readable
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:,+".contains(c))
    {
        value.to_owned()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
