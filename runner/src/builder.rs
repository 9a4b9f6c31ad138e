use crate::executors::ExecutorError;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info};

/// Runs the build command at most once per binary directory and invocation
#[derive(Debug, Default)]
pub struct BuildCache {
    command: Vec<String>,
    built: BTreeSet<PathBuf>,
}

impl BuildCache {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            built: BTreeSet::new(),
        }
    }

    /// Build the directory containing `binary` unless it was built before.
    /// Returns whether the build command ran.
    pub fn ensure_built(&mut self, binary: &Path) -> Result<bool, ExecutorError> {
        let Some((program, args)) = self.command.split_first() else {
            return Ok(false);
        };

        let directory = binary
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        if self.built.contains(&directory) {
            debug!(directory = ?directory, "Already built");
            return Ok(false);
        }

        info!(directory = ?directory, "Building with {}", self.command.join(" "));

        let status = Command::new(program)
            .args(args)
            .current_dir(&directory)
            .status()
            .map_err(|source| ExecutorError::Spawn {
                command: self.command.join(" "),
                source,
            })?;

        if !status.success() {
            return Err(ExecutorError::BuildFailed { directory, status });
        }

        self.built.insert(directory);

        Ok(true)
    }
}
