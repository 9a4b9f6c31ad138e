use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Globs were invalid")]
    InvalidGlobs(#[from] globset::Error),
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[source] Error),
    #[error("Failed to read {path:?}: {source}")]
    ReadFailed { path: PathBuf, source: Error },
    #[error("Invalid runner config: {0}")]
    InvalidConfig(#[from] serde_yaml::Error),
    #[error("Runner config failed preflight checks")]
    Preflight,
    #[error("Runner config does not describe a {0} executor")]
    UnsupportedExecutor(&'static str),
    #[error("No parameter file found in {0:?}")]
    NoConfig(PathBuf),
    #[error("Multiple parameter files found in {0:?}: {1:?}")]
    MultipleConfigs(PathBuf, Vec<PathBuf>),
    #[error("{file:?} is missing {block}.{field}")]
    MissingField {
        file: PathBuf,
        block: &'static str,
        field: &'static str,
    },
    #[error("{file:?}: invalid value '{value}' for {field}")]
    InvalidField {
        file: PathBuf,
        field: &'static str,
        value: String,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    // executor config, selects between local processes and the batch cluster
    pub executor: ExecutorConfig,
    // command run in the binary's directory before its first dispatch, empty disables building
    #[serde(default = "default_build_command")]
    pub build: Vec<String>,
    // which files inside a directory are parameter files
    #[serde(default = "default_config_glob")]
    pub config_glob: String,
    // one back-off time unit in milliseconds
    #[serde(default = "default_poll_unit")]
    pub poll_unit_ms: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(tag = "name", rename_all = "lowercase", deny_unknown_fields)]
pub enum ExecutorConfig {
    Local {
        // called as `wrapper binary parameter_file log_file task_count`
        wrapper: PathBuf,
        // total task slots shared by concurrent jobs, sequential execution if absent
        #[serde(default)]
        budget: Option<usize>,
    },
    Slurm {
        cores_per_node: usize,
        max_nodes: usize,
        #[serde(default)]
        template: Option<PathBuf>,
        #[serde(default)]
        large_job: Option<LargeJobConfig>,
        #[serde(default = "default_job_dir")]
        job_dir: PathBuf,
    },
}

/// extra sbatch flags for jobs spanning many nodes, e.g. another partition
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LargeJobConfig {
    pub min_nodes: usize,
    pub flags: String,
}

impl RunnerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let text = fs::read_to_string(path).map_err(|source| ConfigErrors::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigErrors> {
        let config: Self = serde_yaml::from_str(text)?;
        debug!("Loaded runner config: {config:?}");

        Ok(config)
    }

    /// Glob used to classify run directories; falls back to the default when
    /// no runner config exists, since discovery does not need an executor.
    pub fn discovery_glob(path: &Path) -> Result<String, ConfigErrors> {
        if path.exists() {
            Ok(Self::load(path)?.config_glob)
        } else {
            debug!(path = ?path, "No runner config, using default parameter file glob");
            Ok(default_config_glob())
        }
    }

    pub fn poll_unit(&self) -> Duration {
        Duration::from_millis(self.poll_unit_ms)
    }

    pub fn config_matcher(&self) -> Result<GlobMatcher, ConfigErrors> {
        compile_config_glob(&self.config_glob)
    }

    /// Validate everything that can be checked before discovery.
    /// Returns true if any problem was found, all problems are logged.
    pub fn preflight_checks(&self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if let Err(e) = self.config_matcher() {
            error!("config_glob '{}' is invalid: {e}", self.config_glob);
            contains_error = true;
        }

        if self.poll_unit_ms == 0 {
            error!("poll_unit_ms cannot be 0, polling would spin");
            contains_error = true;
        }

        if self.build.is_empty() {
            warn!("No build command configured, binaries are expected to be up to date");
        }

        match &self.executor {
            ExecutorConfig::Local { wrapper, budget } => {
                match check_executable(wrapper) {
                    Ok(true) => {}
                    Ok(false) => {
                        error!(
                            "executor.wrapper {} is not executable",
                            wrapper.to_string_lossy()
                        );
                        contains_error = true;
                    }
                    Err(e) => {
                        error!(
                            "Failed to find executor.wrapper ({}): {e}",
                            wrapper.to_string_lossy()
                        );
                        contains_error = true;
                    }
                }

                if *budget == Some(0) {
                    error!("executor.budget cannot be 0, no job would ever be dispatched");
                    contains_error = true;
                }
            }
            ExecutorConfig::Slurm {
                cores_per_node,
                max_nodes,
                template,
                ..
            } => {
                if *cores_per_node == 0 {
                    error!("executor.cores_per_node cannot be 0");
                    contains_error = true;
                }

                if *max_nodes == 0 {
                    error!("executor.max_nodes cannot be 0");
                    contains_error = true;
                }

                if let Some(template) = template {
                    if !template.is_file() {
                        error!(
                            "executor.template {} is not a file",
                            template.to_string_lossy()
                        );
                        contains_error = true;
                    }
                }
            }
        }

        contains_error
    }
}

pub fn compile_config_glob(glob: &str) -> Result<GlobMatcher, ConfigErrors> {
    Ok(GlobBuilder::new(glob)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}

fn default_build_command() -> Vec<String> {
    vec!["make".to_owned()]
}

fn default_config_glob() -> String {
    "*.prm".to_owned()
}

fn default_poll_unit() -> u64 {
    1000
}

fn default_job_dir() -> PathBuf {
    PathBuf::from(".benchkit/jobs")
}
