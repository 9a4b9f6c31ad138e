use crate::{
    benchmark::Benchmark,
    metrics::{
        BenchmarkDeclaration, MetricDeclaration, MetricError, MetricType, MetricValue,
        MetricsMeasurement,
    },
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("unknown reduce policy '{0}', expected avg, max or min")]
    UnknownPolicy(String),
    #[error("no repetitions to reduce")]
    NoRepetitions,
    #[error("benchmark {benchmark}, metric {metric}: {source}")]
    InvalidValue {
        benchmark: String,
        metric: String,
        source: MetricError,
    },
}

/// How repeated runs of the same benchmark collapse into one series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReducePolicy {
    /// sum over the reporting repetitions divided by the total repetition count
    #[default]
    Avg,
    Max,
    /// truncates to the shortest repetition
    Min,
}

impl FromStr for ReducePolicy {
    type Err = ReduceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "avg" => Ok(Self::Avg),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            other => Err(ReduceError::UnknownPolicy(other.to_owned())),
        }
    }
}

impl fmt::Display for ReducePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Max => f.write_str("max"),
            Self::Min => f.write_str("min"),
        }
    }
}

impl ReducePolicy {
    /// name of the benchmark produced by reducing `name`
    pub fn reduced_name(&self, name: &str) -> String {
        format!("{name}_{self}")
    }

    /// type of a reduced metric, averages are never integral
    fn reduced_type(&self, kind: MetricType) -> MetricType {
        match self {
            Self::Avg => MetricType::Float,
            Self::Max | Self::Min => kind,
        }
    }
}

/// Collapse the per-repetition extractions of one run directory into a single
/// benchmark per name found in the first repetition.
pub fn reduce_repetitions(
    repetitions: &[Vec<Benchmark>],
    policy: ReducePolicy,
) -> Result<Vec<Benchmark>, ReduceError> {
    let (first, _) = repetitions
        .split_first()
        .ok_or(ReduceError::NoRepetitions)?;

    first
        .iter()
        .map(|benchmark| reduce_benchmark(benchmark.name(), repetitions, policy))
        .collect()
}

fn reduce_benchmark(
    name: &str,
    repetitions: &[Vec<Benchmark>],
    policy: ReducePolicy,
) -> Result<Benchmark, ReduceError> {
    let runs = repetitions
        .iter()
        .map(|repetition| repetition.iter().find(|benchmark| benchmark.name() == name))
        .collect_vec();
    let lengths = runs
        .iter()
        .map(|run| run.map_or(0, |benchmark| benchmark.measurements().len()));

    let count = match policy {
        ReducePolicy::Avg | ReducePolicy::Max => lengths.max(),
        ReducePolicy::Min => lengths.min(),
    }
    .unwrap_or(0);

    // the first repetition always contains `name`
    let reference = runs
        .iter()
        .flatten()
        .next()
        .ok_or(ReduceError::NoRepetitions)?;
    let declaration = reference.declaration();
    let reduced_name = policy.reduced_name(name);

    debug!(
        benchmark = %name,
        policy = %policy,
        iterations = count,
        "Reducing {} repetitions",
        repetitions.len()
    );

    let mut measurements = Vec::with_capacity(count);

    for index in 0..count {
        let gathered = runs
            .iter()
            .filter_map(|run| run.and_then(|benchmark| benchmark.measurements().get(index)))
            .collect_vec();

        let Some(iteration) = gathered.first().map(|measurement| measurement.iteration) else {
            continue;
        };

        let mut values = Vec::with_capacity(declaration.metrics.len());

        for metric in declaration.metrics.iter() {
            let parsed = gathered
                .iter()
                .filter_map(|measurement| measurement.value(&metric.name))
                .map(|value| MetricValue::parse(value, metric.kind))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| ReduceError::InvalidValue {
                    benchmark: name.to_owned(),
                    metric: metric.name.clone(),
                    source,
                })?;

            if let Some(value) = combine(&parsed, policy, repetitions.len()) {
                values.push((metric.name.clone(), value.to_string()));
            }
        }

        if !values.is_empty() {
            measurements.push(MetricsMeasurement {
                benchmark: reduced_name.clone(),
                iteration,
                values,
            });
        }
    }

    let retype = |metric: &MetricDeclaration| MetricDeclaration {
        name: metric.name.clone(),
        kind: policy.reduced_type(metric.kind),
    };

    Ok(Benchmark::from_parts(
        BenchmarkDeclaration {
            name: reduced_name,
            metrics: declaration.metrics.iter().map(retype).collect(),
        },
        reference.active_metrics().iter().map(retype).collect(),
        measurements,
    ))
}

/// `avg` divides by the total repetition count: repetitions that stopped
/// before this iteration count as zero. `max`/`min` ignore them.
fn combine(values: &[MetricValue], policy: ReducePolicy, repeat_count: usize) -> Option<MetricValue> {
    let (first, rest) = values.split_first()?;

    Some(match policy {
        ReducePolicy::Avg => MetricValue::Float(
            values.iter().map(MetricValue::as_f64).sum::<f64>() / repeat_count as f64,
        ),
        ReducePolicy::Max => rest.iter().fold(*first, |acc, value| acc.max(*value)),
        ReducePolicy::Min => rest.iter().fold(*first, |acc, value| acc.min(*value)),
    })
}
