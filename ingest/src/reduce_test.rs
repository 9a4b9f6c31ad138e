use crate::{
    benchmark::Benchmark,
    extract::extract_benchmarks,
    metrics::MetricType,
    reduce::{reduce_repetitions, ReduceError, ReducePolicy},
};
use std::fmt::Write;

/// a log of `iterations` measurements of `bench` with r=<base + i> and it=<i>
fn repetition(iterations: usize, base: f64) -> Vec<Benchmark> {
    let mut log = String::from("#benchmark[bench]: r, it<int>\n");

    for index in 0..iterations {
        writeln!(log, "@[bench]:{index} r={},it={index}", base + index as f64).unwrap();
    }

    extract_benchmarks(&log).unwrap()
}

fn value(benchmark: &Benchmark, index: usize, metric: &str) -> f64 {
    benchmark.measurements()[index]
        .value(metric)
        .unwrap()
        .parse()
        .unwrap()
}

#[test]
pub fn avg_divides_by_repeat_count() {
    let repetitions = vec![repetition(11, 0.0), repetition(11, 10.0), repetition(6, 100.0)];
    let reduced = reduce_repetitions(&repetitions, ReducePolicy::Avg).unwrap();

    assert_eq!(reduced.len(), 1);
    let benchmark = &reduced[0];
    assert_eq!(benchmark.name(), "bench_avg");
    assert_eq!(benchmark.measurements().len(), 11);

    // the third repetition stopped after iteration 5
    assert_eq!(value(benchmark, 7, "r"), (7.0 + 17.0 + 0.0) / 3.0);
    assert_eq!(value(benchmark, 2, "r"), (2.0 + 12.0 + 102.0) / 3.0);
    assert_eq!(benchmark.declaration().metrics[1].kind, MetricType::Float);
}

#[test]
pub fn min_truncates_to_shortest_repetition() {
    let repetitions = vec![repetition(11, 0.0), repetition(4, 10.0), repetition(6, 100.0)];
    let reduced = reduce_repetitions(&repetitions, ReducePolicy::Min).unwrap();

    assert_eq!(reduced[0].measurements().len(), 4);
    assert_eq!(value(&reduced[0], 3, "r"), 3.0);
    assert_eq!(reduced[0].measurements()[3].value("it"), Some("3"));
    assert_eq!(reduced[0].declaration().metrics[1].kind, MetricType::Int);
}

#[test]
pub fn max_ignores_missing_repetitions() {
    let repetitions = vec![repetition(3, 0.0), repetition(8, -50.0)];
    let reduced = reduce_repetitions(&repetitions, ReducePolicy::Max).unwrap();

    assert_eq!(reduced[0].name(), "bench_max");
    assert_eq!(reduced[0].measurements().len(), 8);
    assert_eq!(value(&reduced[0], 1, "r"), 1.0);
    assert_eq!(value(&reduced[0], 6, "r"), -44.0);
}

#[test]
pub fn benchmark_missing_in_later_repetition() {
    let other = extract_benchmarks("#benchmark[other]: r\n@[other]:0 r=1\n").unwrap();
    let repetitions = vec![repetition(2, 4.0), other];

    let avg = reduce_repetitions(&repetitions, ReducePolicy::Avg).unwrap();
    assert_eq!(avg.len(), 1);
    assert_eq!(value(&avg[0], 0, "r"), 2.0);

    let min = reduce_repetitions(&repetitions, ReducePolicy::Min).unwrap();
    assert!(min[0].measurements().is_empty());
}

#[test]
pub fn unknown_policy_is_rejected() {
    assert!(matches!(
        "median".parse::<ReducePolicy>(),
        Err(ReduceError::UnknownPolicy(_))
    ));
    assert_eq!("max".parse::<ReducePolicy>().unwrap(), ReducePolicy::Max);
}

#[test]
pub fn invalid_value_is_reported() {
    let broken = extract_benchmarks("#benchmark[bench]: r, it<int>\n@[bench]:0 r=1,it=1.5\n")
        .unwrap();

    assert!(matches!(
        reduce_repetitions(&[broken], ReducePolicy::Max),
        Err(ReduceError::InvalidValue { .. })
    ));
    assert!(matches!(
        reduce_repetitions(&[], ReducePolicy::Max),
        Err(ReduceError::NoRepetitions)
    ));
}
