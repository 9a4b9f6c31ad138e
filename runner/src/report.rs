use crate::collector::RunDirectory;
use benchkit_ingest::{
    collect_graphs, extract_repetitions, reduce_repetitions, restrict_benchmarks, Benchmark,
    ExtractError, Graph, GraphError, ReduceError, XAxis,
};
use itertools::Itertools;
use serde::Serialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Reduce(#[from] ReduceError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("'{0}' does not yield a usable file name")]
    InvalidFileName(String),
    #[error("Failed to serialize graphs: {0}")]
    Serialize(#[from] serde_yaml::Error),
    #[error("Failed to write {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("Comparing requires at least one run directory")]
    NothingToCompare,
}

/// Which benchmarks end up in which graph file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    /// all named benchmarks in one file
    Benchmarks(Vec<String>),
    /// one file per named benchmark
    ForEach(Vec<String>),
}

impl Selection {
    fn groups(&self) -> Vec<Option<Vec<String>>> {
        match self {
            Self::All => vec![None],
            Self::Benchmarks(names) => vec![Some(names.clone())],
            Self::ForEach(names) => names.iter().map(|name| Some(vec![name.clone()])).collect(),
        }
    }
}

/// Everything an external renderer needs for one figure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotDocument {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub graphs: Vec<Graph>,
}

/// Replace characters that are unsafe in file names
pub fn sanitize_file_name(name: &str) -> Result<String, ReportError> {
    let sanitized = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect::<String>();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        return Err(ReportError::InvalidFileName(name.to_owned()));
    }

    Ok(sanitized)
}

fn joined_or_all(names: Option<&[String]>) -> String {
    match names {
        Some(names) if !names.is_empty() => names.join(","),
        _ => "all".to_owned(),
    }
}

/// `<benchmarks>.<metrics|all>.yaml`
pub fn graphs_file_name(
    benchmarks: Option<&[String]>,
    metrics: Option<&[String]>,
) -> Result<String, ReportError> {
    sanitize_file_name(&format!(
        "{}.{}.yaml",
        joined_or_all(benchmarks),
        joined_or_all(metrics)
    ))
}

fn axis_label(axis: &XAxis) -> String {
    match axis {
        XAxis::Iteration => "iterations".to_owned(),
        XAxis::Metric(metric) => metric.clone(),
    }
}

/// Extract every repetition log of `run`, restrict and reduce with its policy
#[instrument(skip_all, fields(run = %run.name()))]
pub fn reduced_benchmarks(
    run: &RunDirectory,
    benchmarks: Option<&[String]>,
    metrics: Option<&[String]>,
) -> Result<Vec<Benchmark>, ReportError> {
    let repetitions = extract_repetitions(&run.path, run.request.repeat_count)?
        .into_iter()
        .map(|repetition| restrict_benchmarks(repetition, benchmarks, metrics))
        .collect_vec();

    Ok(reduce_repetitions(&repetitions, run.request.reduce_policy)?)
}

/// The x-axis metric has to survive a metric restriction, it is not plotted itself
fn with_axis_metric(metrics: Option<&[String]>, axis: &XAxis) -> Option<Vec<String>> {
    metrics.map(|metrics| {
        let mut metrics = metrics.to_vec();

        if let XAxis::Metric(metric) = axis {
            if !metrics.contains(metric) {
                metrics.push(metric.clone());
            }
        }

        metrics
    })
}

fn write_document(path: &Path, document: &PlotDocument) -> Result<(), ReportError> {
    let write_failed = |source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_failed)?;
    }
    fs::write(path, serde_yaml::to_string(document)?).map_err(write_failed)?;

    info!(path = ?path, graphs = document.graphs.len(), "Wrote graphs");

    Ok(())
}

/// Write the graphs of one run directory to `<run>/graphs/`.
/// Returns the files written; selections without any graph are skipped.
pub fn plot_run(
    run: &RunDirectory,
    selection: &Selection,
    metrics: Option<&[String]>,
    axis: &XAxis,
) -> Result<Vec<PathBuf>, ReportError> {
    let mut written = Vec::new();
    let restriction = with_axis_metric(metrics, axis);

    for group in selection.groups() {
        let benchmarks = reduced_benchmarks(run, group.as_deref(), restriction.as_deref())?;
        let graphs = collect_graphs(&benchmarks, axis)?;

        if graphs.is_empty() {
            warn!(
                run = %run.name(),
                "No graphs for benchmarks {}",
                joined_or_all(group.as_deref())
            );
            continue;
        }

        let path = run
            .path
            .join("graphs")
            .join(graphs_file_name(group.as_deref(), metrics)?);
        let document = PlotDocument {
            title: format!("{} {}", run.name(), joined_or_all(group.as_deref())),
            x_label: axis_label(axis),
            y_label: joined_or_all(metrics),
            graphs,
        };

        write_document(&path, &document)?;
        written.push(path);
    }

    Ok(written)
}

/// Graphs of several run directories in one document, labels prefixed by the
/// run directory's name. Written to `<output>/comparisons/<a>-vs-<b>.<benchmarks>.<metrics>.yaml`.
pub fn compare_runs(
    runs: &[RunDirectory],
    benchmarks: &[String],
    metrics: &[String],
    axis: &XAxis,
    output: &Path,
) -> Result<PathBuf, ReportError> {
    if runs.is_empty() {
        return Err(ReportError::NothingToCompare);
    }

    let mut graphs = Vec::new();
    let restriction = with_axis_metric(Some(metrics), axis);

    for run in runs {
        let reduced = reduced_benchmarks(run, Some(benchmarks), restriction.as_deref())?;

        graphs.extend(collect_graphs(&reduced, axis)?.into_iter().map(|mut graph| {
            graph.prefix_label(&run.name());
            graph
        }));
    }

    let title = sanitize_file_name(&format!(
        "{}.{}.{}",
        runs.iter().map(RunDirectory::name).join("-vs-"),
        joined_or_all(Some(benchmarks)),
        joined_or_all(Some(metrics))
    ))?;
    let path = output.join("comparisons").join(format!("{title}.yaml"));

    let document = PlotDocument {
        title,
        x_label: axis_label(axis),
        y_label: joined_or_all(Some(metrics)),
        graphs,
    };
    write_document(&path, &document)?;

    Ok(path)
}
