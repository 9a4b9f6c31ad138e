//! Parsing of benchmark run logs into typed metric series, reduction of
//! repeated runs and conversion into plottable graphs.

pub mod benchmark;
pub mod extract;
pub mod graph;
pub mod metrics;
pub mod reduce;

#[cfg(test)]
mod reduce_test;

pub use benchmark::{restrict_benchmarks, Benchmark, BenchmarkError};
pub use extract::{
    extract_benchmarks, extract_repetitions, extract_run_log, run_log_file_name, ExtractError,
};
pub use graph::{collect_graphs, Graph, GraphError, Point, XAxis};
pub use metrics::{
    BenchmarkDeclaration, MetricDeclaration, MetricError, MetricType, MetricValue,
    MetricsMeasurement,
};
pub use reduce::{reduce_repetitions, ReduceError, ReducePolicy};
