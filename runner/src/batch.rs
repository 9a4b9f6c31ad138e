use crate::executors::ExecutorError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    fmt::Debug,
    path::Path,
    process::{Command, Output},
};
use tracing::{debug, trace};
use tracing_unwrap::ResultExt;

static SUBMITTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Submitted batch job (\d+)").expect_or_log("submission pattern")
});

/// State of a job as reported by the batch queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueStatus {
    /// not listed anymore
    Absent,
    /// PD
    Pending,
    /// CG
    Completing,
    Running(String),
    /// queue output that could not be understood
    Unknown,
}

impl QueueStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Absent | Self::Completing)
    }
}

/// The three primitives the cluster scheduler needs from a batch system
pub trait BatchSystem: Debug {
    /// submit a job script, returning the job id
    fn submit(&self, script: &Path) -> Result<String, ExecutorError>;
    fn status(&self, id: &str) -> Result<QueueStatus, ExecutorError>;
    fn cancel(&self, id: &str) -> Result<(), ExecutorError>;
}

pub fn parse_job_id(output: &str) -> Option<String> {
    SUBMITTED
        .captures(output)
        .map(|captures| captures[1].to_owned())
}

/// Find the row of `id` in queue output; its last column is the status code
pub fn parse_queue_status(output: &str, id: &str) -> QueueStatus {
    let mut rows = output
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|columns| !columns.is_empty())
        .peekable();

    if rows.peek().is_none() {
        return QueueStatus::Absent;
    }

    let mut understood = false;

    for columns in rows {
        if columns[0] == id {
            return match columns.last() {
                Some(&"PD") if columns.len() > 1 => QueueStatus::Pending,
                Some(&"CG") if columns.len() > 1 => QueueStatus::Completing,
                Some(code) if columns.len() > 1 => QueueStatus::Running((*code).to_owned()),
                _ => QueueStatus::Unknown,
            };
        }

        // other jobs are listed in the same format, the queue was read fine
        understood |= columns[0].chars().all(|c| c.is_ascii_digit() || c == '_');
    }

    if understood {
        QueueStatus::Absent
    } else {
        QueueStatus::Unknown
    }
}

/// Slurm through its command line tools
#[derive(Debug, Default, Clone)]
pub struct Slurm;

impl Slurm {
    fn run(command: &mut Command) -> Result<Output, ExecutorError> {
        trace!("Running {command:?}");

        command.output().map_err(|source| ExecutorError::Spawn {
            command: format!("{command:?}"),
            source,
        })
    }
}

impl BatchSystem for Slurm {
    fn submit(&self, script: &Path) -> Result<String, ExecutorError> {
        let output = Self::run(Command::new("sbatch").arg(script))?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        parse_job_id(&stdout).ok_or_else(|| ExecutorError::Submission {
            script: script.to_path_buf(),
            output: format!("{stdout}{}", String::from_utf8_lossy(&output.stderr)),
        })
    }

    fn status(&self, id: &str) -> Result<QueueStatus, ExecutorError> {
        let output = Self::run(Command::new("squeue").args(["-h", "-j", id, "-o", "%i %t"]))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(job = %id, "squeue failed: {stderr}");

            // jobs purged from the controller are reported as invalid
            return Ok(if stderr.contains("Invalid job id") {
                QueueStatus::Absent
            } else {
                QueueStatus::Unknown
            });
        }

        Ok(parse_queue_status(&String::from_utf8_lossy(&output.stdout), id))
    }

    fn cancel(&self, id: &str) -> Result<(), ExecutorError> {
        let output = Self::run(Command::new("scancel").arg(id))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ExecutorError::BatchCommand {
                command: format!("scancel {id}"),
                output: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}
