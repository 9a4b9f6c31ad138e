use crate::metrics::{BenchmarkDeclaration, MetricDeclaration, MetricsMeasurement};
use itertools::Itertools;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BenchmarkError {
    #[error("tried to add a measurement of benchmark {measurement} to {benchmark}")]
    ForeignMeasurement {
        benchmark: String,
        measurement: String,
    },
    #[error("measurement '{measurement}' misses metrics [{}] of {benchmark}", .missing.join(", "))]
    MissingMetrics {
        benchmark: String,
        missing: Vec<String>,
        measurement: String,
    },
}

/// A declared benchmark and every measurement accepted for it, in log order
#[derive(Debug, Clone, PartialEq)]
pub struct Benchmark {
    declaration: BenchmarkDeclaration,
    active_metrics: Vec<MetricDeclaration>,
    measurements: Vec<MetricsMeasurement>,
}

impl Benchmark {
    pub fn new(declaration: BenchmarkDeclaration) -> Self {
        Self {
            active_metrics: declaration.metrics.clone(),
            declaration,
            measurements: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.declaration.name
    }

    /// the canonical metric list, untouched by `restrict_metrics`
    pub fn declaration(&self) -> &BenchmarkDeclaration {
        &self.declaration
    }

    pub fn active_metrics(&self) -> &[MetricDeclaration] {
        &self.active_metrics
    }

    pub fn measurements(&self) -> &[MetricsMeasurement] {
        &self.measurements
    }

    /// `<name>.<metric><metric>...` over the active metrics
    pub fn id(&self) -> String {
        format!(
            "{}.{}",
            self.declaration.name,
            self.active_metrics
                .iter()
                .map(|metric| metric.name.as_str())
                .join("")
        )
    }

    /// Accept a measurement if it carries every declared metric.
    /// Values for metrics outside the declaration are dropped.
    pub fn add_measurement(
        &mut self,
        mut measurement: MetricsMeasurement,
    ) -> Result<(), BenchmarkError> {
        if measurement.benchmark != self.declaration.name {
            return Err(BenchmarkError::ForeignMeasurement {
                benchmark: self.declaration.name.clone(),
                measurement: measurement.benchmark,
            });
        }

        let missing = self
            .declaration
            .metrics
            .iter()
            .filter(|metric| measurement.value(&metric.name).is_none())
            .map(|metric| metric.name.clone())
            .collect_vec();

        if !missing.is_empty() {
            return Err(BenchmarkError::MissingMetrics {
                benchmark: self.declaration.name.clone(),
                missing,
                measurement: measurement.to_string(),
            });
        }

        let declared = &self.declaration;
        measurement
            .values
            .retain(|(name, _)| declared.metric(name).is_some());

        self.measurements.push(measurement);

        Ok(())
    }

    /// Keep only the given metrics in every stored measurement.
    /// Measurements left without any value are removed.
    pub fn restrict_metrics<S: AsRef<str>>(&mut self, wanted: &[S]) {
        let is_wanted = |name: &str| wanted.iter().any(|wanted| wanted.as_ref() == name);

        self.active_metrics.retain(|metric| is_wanted(&metric.name));

        for measurement in self.measurements.iter_mut() {
            measurement.values.retain(|(name, _)| is_wanted(name));
        }
        self.measurements
            .retain(|measurement| !measurement.values.is_empty());

        if self.measurements.is_empty() {
            warn!(
                benchmark = %self.declaration.name,
                metrics = %wanted.iter().map(|name| name.as_ref()).join(","),
                "Removed all measurements after restricting metrics"
            );
        }
    }

    /// build a benchmark from already validated parts, used by the reduction
    pub(crate) fn from_parts(
        declaration: BenchmarkDeclaration,
        active_metrics: Vec<MetricDeclaration>,
        measurements: Vec<MetricsMeasurement>,
    ) -> Self {
        Self {
            declaration,
            active_metrics,
            measurements,
        }
    }
}

/// Restrict a set of extracted benchmarks by name and/or metric.
/// `None` keeps everything for that dimension.
pub fn restrict_benchmarks<S: AsRef<str>>(
    benchmarks: Vec<Benchmark>,
    wanted_benchmarks: Option<&[S]>,
    wanted_metrics: Option<&[S]>,
) -> Vec<Benchmark> {
    let mut benchmarks = match wanted_benchmarks {
        Some(wanted) => benchmarks
            .into_iter()
            .filter(|benchmark| wanted.iter().any(|name| name.as_ref() == benchmark.name()))
            .collect_vec(),
        None => benchmarks,
    };

    if let Some(wanted) = wanted_metrics {
        for benchmark in benchmarks.iter_mut() {
            benchmark.restrict_metrics(wanted);
        }
    }

    benchmarks
}
