use crate::{config::ConfigErrors, params::ResourceRequest};
use benchkit_ingest::run_log_file_name;
use globset::GlobMatcher;
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// A leaf of the suite tree: one benchmark configuration with its parameter file
#[derive(Debug, Clone, PartialEq)]
pub struct RunDirectory {
    pub path: PathBuf,
    pub config: PathBuf,
    pub request: ResourceRequest,
}

impl RunDirectory {
    /// read the single parameter file of `path`
    pub fn load(path: &Path, matcher: &GlobMatcher) -> Result<Self, ConfigErrors> {
        let path = fs::canonicalize(path).map_err(|source| ConfigErrors::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config = find_single_config(&path, matcher)?;
        let request = ResourceRequest::load(&config)?;

        Ok(Self {
            path,
            config,
            request,
        })
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    pub fn log_path(&self, repetition: usize) -> PathBuf {
        self.path.join(run_log_file_name(repetition))
    }

    /// delete the logs of previous invocations
    pub fn clean(&self) -> Result<usize, ConfigErrors> {
        let read_failed = |source| ConfigErrors::ReadFailed {
            path: self.path.clone(),
            source,
        };
        let mut removed = 0;

        for entry in fs::read_dir(&self.path).map_err(read_failed)? {
            let path = entry.map_err(read_failed)?.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "log") {
                fs::remove_file(&path).map_err(read_failed)?;
                removed += 1;
            }
        }

        debug!(path = ?self.path, removed, "Cleaned run directory");

        Ok(removed)
    }
}

/// files directly inside `directory` matching the parameter file glob, sorted
pub fn config_files(directory: &Path, matcher: &GlobMatcher) -> Result<Vec<PathBuf>, ConfigErrors> {
    let read_failed = |source| ConfigErrors::ReadFailed {
        path: directory.to_path_buf(),
        source,
    };

    let mut files = Vec::new();

    for entry in fs::read_dir(directory).map_err(read_failed)? {
        let path = entry.map_err(read_failed)?.path();

        if path.is_file()
            && path
                .file_name()
                .map_or(false, |name| matcher.is_match(name))
        {
            files.push(path);
        }
    }

    files.sort();

    Ok(files)
}

/// A directory is a run directory iff it directly holds exactly one parameter file
pub fn is_run_directory(directory: &Path, matcher: &GlobMatcher) -> Result<bool, ConfigErrors> {
    Ok(config_files(directory, matcher)?.len() == 1)
}

pub fn find_single_config(directory: &Path, matcher: &GlobMatcher) -> Result<PathBuf, ConfigErrors> {
    let mut files = config_files(directory, matcher)?;

    match files.len() {
        0 => Err(ConfigErrors::NoConfig(directory.to_path_buf())),
        1 => Ok(files.remove(0)),
        _ => Err(ConfigErrors::MultipleConfigs(directory.to_path_buf(), files)),
    }
}

/// Depth-first walk over all roots yielding run directories in a stable order.
/// Every directory is classified on its own, so a run directory nested inside
/// another one is reported as well.
pub fn discover<P: AsRef<Path>>(
    roots: &[P],
    matcher: &GlobMatcher,
) -> Result<Vec<PathBuf>, ConfigErrors> {
    let Some((first, others)) = roots.split_first() else {
        return Ok(Vec::new());
    };

    let mut builder = WalkBuilder::new(first);

    // add other paths
    others.iter().for_each(|path| {
        builder.add(path);
    });
    builder
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b));

    let directories = builder
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to search for run directories: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_dir()))
        .map(DirEntry::into_path)
        .collect_vec();

    let mut leaves = Vec::new();

    for directory in directories {
        if is_run_directory(&directory, matcher)? {
            debug!(path = ?directory, "Found run directory");
            leaves.push(directory);
        }
    }

    Ok(leaves)
}

/// Discover and load every run directory below the roots. Any broken
/// parameter file aborts before anything is scheduled.
pub fn load_run_directories<P: AsRef<Path>>(
    roots: &[P],
    matcher: &GlobMatcher,
) -> Result<Vec<RunDirectory>, ConfigErrors> {
    let runs = discover(roots, matcher)?
        .iter()
        .map(|path| RunDirectory::load(path, matcher))
        .collect::<Result<Vec<_>, _>>()?;

    info!("Found {} run directories", runs.len());

    Ok(runs)
}
