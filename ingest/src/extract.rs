use crate::{
    benchmark::{Benchmark, BenchmarkError},
    metrics::{BenchmarkDeclaration, MetricDeclaration, MetricError, MetricType, MetricsMeasurement},
};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    collections::BTreeSet,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use tracing_unwrap::ResultExt;

// Both productions may be preceded by a logger prefix such as `[ 0][INFO]----(0.1 sec) `
static DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"#benchmark\[([^\]\n]+)\]:([^\n]*)").expect_or_log("declaration pattern")
});
static MEASUREMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@\[([^\]\n]+)\]:(\d+)[ \t]+([^\n]*)").expect_or_log("measurement pattern")
});
static METRIC_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([^\s,<>]+)\s*(?:<\s*([^\s<>]*)\s*>)?\s*$").expect_or_log("metric pattern")
});
// the comma separated pairs at the start of a measurement, anything after them is free text
static LEADING_VALUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t]*[^\s,=]+[ \t]*=[ \t]*[^\s,]+(?:[ \t]*,[ \t]*[^\s,=]+[ \t]*=[ \t]*[^\s,]+)*")
        .expect_or_log("leading values pattern")
});
static VALUE_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([^\s,=]+)\s*=\s*([^\s,]+)\s*$").expect_or_log("value pattern")
});

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("malformed benchmark declaration '{0}'")]
    MalformedDeclaration(String),
    #[error("malformed measurement '{0}'")]
    MalformedMeasurement(String),
    #[error("invalid declaration '{text}': {source}")]
    InvalidDeclaration { text: String, source: MetricError },
    #[error(transparent)]
    RejectedMeasurement(#[from] BenchmarkError),
    #[error("run log not found at {0:?}")]
    LogNotFound(PathBuf),
    #[error("failed to read run log {path:?}: {source}")]
    ReadLog { path: PathBuf, source: io::Error },
}

/// file name of the log written by repetition `index`
pub fn run_log_file_name(index: usize) -> String {
    format!("run{index}.log")
}

/// Parse every `#benchmark[name]: metric, metric<int>, ...` line
pub fn extract_declarations(text: &str) -> Result<Vec<BenchmarkDeclaration>, ExtractError> {
    DECLARATION
        .captures_iter(text)
        .map(|captures| {
            let line = captures[0].trim();
            let invalid = |source| ExtractError::InvalidDeclaration {
                text: line.to_owned(),
                source,
            };

            // a trailing comma is tolerated
            let metrics = captures[2]
                .trim_end_matches(|c: char| c == ',' || c.is_whitespace())
                .split(',')
                .map(|token| parse_metric_declaration(token, line))
                .collect::<Result<Vec<_>, _>>()?;

            BenchmarkDeclaration::new(captures[1].trim(), metrics).map_err(invalid)
        })
        .collect()
}

fn parse_metric_declaration(token: &str, line: &str) -> Result<MetricDeclaration, ExtractError> {
    let captures = METRIC_TOKEN
        .captures(token)
        .ok_or_else(|| ExtractError::MalformedDeclaration(line.to_owned()))?;

    let kind = match captures.get(2) {
        Some(kind) => kind.as_str().parse::<MetricType>(),
        None => Ok(MetricType::Float),
    };

    kind.and_then(|kind| MetricDeclaration::new(&captures[1], kind))
        .map_err(|source| ExtractError::InvalidDeclaration {
            text: line.to_owned(),
            source,
        })
}

/// Parse every `@[name]:<iteration> metric=value,...` line
pub fn extract_measurements(text: &str) -> Result<Vec<MetricsMeasurement>, ExtractError> {
    MEASUREMENT
        .captures_iter(text)
        .map(|captures| {
            let line = captures[0].trim();
            let iteration = captures[2]
                .parse::<u64>()
                .map_err(|_| ExtractError::MalformedMeasurement(line.to_owned()))?;

            let malformed = || ExtractError::MalformedMeasurement(line.to_owned());
            let leading = LEADING_VALUES.find(&captures[3]).ok_or_else(malformed)?;

            // a dangling comma means a broken pair, not trailing text
            let rest = captures[3][leading.end()..].trim_start();
            if rest.starts_with(',') {
                return Err(malformed());
            }
            if !rest.is_empty() {
                debug!(measurement = %line, "Ignoring trailing text '{rest}'");
            }

            let values = leading
                .as_str()
                .split(',')
                .map(|pair| {
                    VALUE_PAIR
                        .captures(pair)
                        .map(|pair| (pair[1].to_owned(), pair[2].to_owned()))
                        .ok_or_else(malformed)
                })
                .collect::<Result<Vec<_>, _>>()?;

            Ok(MetricsMeasurement {
                benchmark: captures[1].trim().to_owned(),
                iteration,
                values,
            })
        })
        .collect()
}

/// Correlate declarations and measurements of one log into benchmarks.
///
/// Measurements naming an undeclared benchmark are dropped, benchmarks without
/// any accepted measurement are not returned.
pub fn extract_benchmarks(text: &str) -> Result<Vec<Benchmark>, ExtractError> {
    let mut benchmarks: Vec<Benchmark> = Vec::new();

    for declaration in extract_declarations(text)? {
        if benchmarks
            .iter()
            .any(|benchmark| benchmark.name() == declaration.name)
        {
            warn!(benchmark = %declaration.name, "Ignoring repeated declaration");
        } else {
            benchmarks.push(Benchmark::new(declaration));
        }
    }

    let mut unmatched = BTreeSet::new();

    for measurement in extract_measurements(text)? {
        match benchmarks
            .iter_mut()
            .find(|benchmark| benchmark.name() == measurement.benchmark)
        {
            Some(benchmark) => benchmark.add_measurement(measurement)?,
            None => {
                if unmatched.insert(measurement.benchmark.clone()) {
                    warn!(
                        benchmark = %measurement.benchmark,
                        "Dropping measurements of undeclared benchmark"
                    );
                }
            }
        }
    }

    benchmarks.retain(|benchmark| !benchmark.measurements().is_empty());

    debug!(
        benchmarks = %benchmarks.iter().map(Benchmark::name).join(","),
        "Extracted benchmarks"
    );

    Ok(benchmarks)
}

#[instrument(level = "debug")]
pub fn extract_run_log(path: &Path) -> Result<Vec<Benchmark>, ExtractError> {
    if !path.is_file() {
        return Err(ExtractError::LogNotFound(path.to_path_buf()));
    }

    let text = fs::read_to_string(path).map_err(|source| ExtractError::ReadLog {
        path: path.to_path_buf(),
        source,
    })?;

    extract_benchmarks(&text)
}

/// Extract `run0.log` .. `run<repeat_count - 1>.log` of a run directory
pub fn extract_repetitions(
    directory: &Path,
    repeat_count: usize,
) -> Result<Vec<Vec<Benchmark>>, ExtractError> {
    (0..repeat_count)
        .map(|index| extract_run_log(&directory.join(run_log_file_name(index))))
        .collect()
}
