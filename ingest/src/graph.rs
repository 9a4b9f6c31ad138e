use crate::benchmark::Benchmark;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("value '{value}' of {label} is not numeric")]
    NotNumeric { label: String, value: String },
    #[error("measurement {iteration} of {benchmark} has no value for x-axis metric {metric}")]
    MissingAxis {
        benchmark: String,
        metric: String,
        iteration: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Graph {
    pub label: String,
    pub points: Vec<Point>,
}

impl Graph {
    /// prefix the label with a suite/run identifier to keep merged plots unique
    pub fn prefix_label(&mut self, prefix: &str) {
        self.label = format!("{prefix}.{}", self.label);
    }
}

/// What a graph uses as its x-coordinate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum XAxis {
    #[default]
    Iteration,
    Metric(String),
}

fn parse_coordinate(label: &str, value: &str) -> Result<f64, GraphError> {
    value.trim().parse().map_err(|_| GraphError::NotNumeric {
        label: label.to_owned(),
        value: value.to_owned(),
    })
}

impl Benchmark {
    /// One graph per metric of the first measurement, labelled `<benchmark>.<metric>`.
    /// An alternate x-axis metric is not plotted against itself.
    pub fn to_graphs(&self, axis: &XAxis) -> Result<Vec<Graph>, GraphError> {
        let Some(first) = self.measurements().first() else {
            return Ok(Vec::new());
        };

        let mut graphs = first
            .values
            .iter()
            .map(|(metric, _)| metric)
            .filter(|metric| !matches!(axis, XAxis::Metric(x) if x == *metric))
            .map(|metric| Graph {
                label: format!("{}.{metric}", self.name()),
                points: Vec::with_capacity(self.measurements().len()),
            })
            .collect::<Vec<_>>();

        for measurement in self.measurements() {
            let x = match axis {
                XAxis::Iteration => measurement.iteration as f64,
                XAxis::Metric(metric) => {
                    let value =
                        measurement
                            .value(metric)
                            .ok_or_else(|| GraphError::MissingAxis {
                                benchmark: self.name().to_owned(),
                                metric: metric.clone(),
                                iteration: measurement.iteration,
                            })?;

                    parse_coordinate(metric, value)?
                }
            };

            for graph in graphs.iter_mut() {
                let metric = &graph.label[self.name().len() + 1..];

                if let Some(value) = measurement.value(metric) {
                    let y = parse_coordinate(&graph.label, value)?;
                    graph.points.push(Point { x, y });
                }
            }
        }

        Ok(graphs)
    }
}

/// Graphs of several benchmarks, in benchmark order
pub fn collect_graphs(benchmarks: &[Benchmark], axis: &XAxis) -> Result<Vec<Graph>, GraphError> {
    let mut graphs = Vec::new();

    for benchmark in benchmarks {
        graphs.extend(benchmark.to_graphs(axis)?);
    }

    Ok(graphs)
}
