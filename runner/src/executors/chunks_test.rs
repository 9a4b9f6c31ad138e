use super::{
    chunks::{nodes_for, partition, split_evenly, RunInstance},
    ExecutorError,
};
use itertools::Itertools;

fn instances(task_counts: &[(usize, usize)]) -> Vec<RunInstance> {
    task_counts
        .iter()
        .enumerate()
        .flat_map(|(run, (task_count, repeat))| {
            (0..*repeat).map(move |repetition| RunInstance {
                run,
                repetition,
                task_count: *task_count,
            })
        })
        .collect()
}

#[test]
pub fn ten_items_over_four_groups() {
    let sizes = split_evenly((0..10).collect(), 4)
        .iter()
        .map(Vec::len)
        .collect_vec();

    assert_eq!(sizes, vec![3, 3, 2, 2]);
}

#[test]
pub fn split_keeps_order_and_drops_empty_groups() {
    let groups = split_evenly(vec!['a', 'b', 'c'], 5);

    assert_eq!(groups, vec![vec!['a'], vec!['b'], vec!['c']]);
    assert!(split_evenly(Vec::<u8>::new(), 3).is_empty());
}

#[test]
pub fn nodes_round_up() {
    assert_eq!(nodes_for(1, 8), 1);
    assert_eq!(nodes_for(8, 8), 1);
    assert_eq!(nodes_for(9, 8), 2);
    assert_eq!(nodes_for(64, 8), 8);
}

#[test]
pub fn single_node_runs_spread_over_free_nodes() {
    // 10 single-node instances, 4 nodes: nothing reserved, 5 groups
    let chunks = partition(instances(&[(4, 10)]), 8, 4).unwrap();

    assert_eq!(chunks.len(), 5);
    assert!(chunks.iter().all(|chunk| chunk.nodes == 1));
    assert!(chunks.iter().all(|chunk| chunk.runs.len() == 2));
    assert!(chunks.iter().all(|chunk| chunk.tasks_per_node == 4));
}

#[test]
pub fn multi_node_runs_reserve_nodes() {
    // 16 tasks need 2 nodes of 8 cores, 5 - 2 = 3 free nodes for the rest
    let chunks = partition(instances(&[(16, 2), (2, 10)]), 8, 5).unwrap();

    assert_eq!(chunks[0].nodes, 2);
    assert_eq!(chunks[0].tasks_per_node, 8);
    assert_eq!(chunks[0].runs.len(), 2);

    let sizes = chunks[1..].iter().map(|chunk| chunk.runs.len()).collect_vec();
    assert_eq!(sizes, vec![3, 3, 2, 2]);
}

#[test]
pub fn every_instance_lands_in_exactly_one_chunk() {
    let input = instances(&[(3, 4), (20, 2), (8, 3), (17, 1), (20, 1), (1, 7)]);
    let chunks = partition(input.clone(), 8, 12).unwrap();

    let covered = chunks
        .iter()
        .flat_map(|chunk| chunk.runs.iter().copied())
        .sorted()
        .collect_vec();

    assert_eq!(covered, input.into_iter().sorted().collect_vec());

    // multi-node chunks share one task count
    for chunk in chunks.iter().filter(|chunk| chunk.nodes > 1) {
        assert!(chunk.runs.iter().map(|run| run.task_count).all_equal());
    }
}

#[test]
pub fn fails_without_free_nodes() {
    // 3 + 2 nodes reserved with a budget of 5
    let result = partition(instances(&[(24, 1), (16, 1), (2, 3)]), 8, 5);

    match result {
        Err(ExecutorError::NodeBudget {
            reserved,
            max_nodes,
        }) => {
            assert_eq!(reserved, 5);
            assert_eq!(max_nodes, 5);
        }
        other => panic!("expected node budget error, got {other:?}"),
    }
}
