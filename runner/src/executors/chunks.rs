use super::ExecutorError;
use std::collections::BTreeMap;
use tracing::debug;

/// One repetition of one run directory, identified by its index in the run list
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunInstance {
    pub run: usize,
    pub repetition: usize,
    pub task_count: usize,
}

/// Runs executed back to back inside a single batch submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub nodes: usize,
    pub tasks_per_node: usize,
    pub runs: Vec<RunInstance>,
}

/// whole nodes needed for `task_count` tasks
pub fn nodes_for(task_count: usize, cores_per_node: usize) -> usize {
    task_count.div_ceil(cores_per_node).max(1)
}

/// Split `items` into `groups` groups whose sizes differ by at most one, larger
/// groups first and order preserved. Empty groups are not returned.
pub fn split_evenly<T>(items: Vec<T>, groups: usize) -> Vec<Vec<T>> {
    if groups == 0 || items.is_empty() {
        return Vec::new();
    }

    let (base, larger) = (items.len() / groups, items.len() % groups);
    let mut items = items.into_iter();

    (0..groups)
        .map(|group| {
            let size = base + usize::from(group < larger);
            items.by_ref().take(size).collect::<Vec<_>>()
        })
        .filter(|group| !group.is_empty())
        .collect()
}

/// Partition run instances into cluster chunks.
///
/// Runs needing more than one node are grouped by task count, each group
/// reserving its node count once. The remaining `free_nodes` bound how many
/// single-node chunks the other runs are spread over (`free_nodes + 1`).
pub fn partition(
    instances: Vec<RunInstance>,
    cores_per_node: usize,
    max_nodes: usize,
) -> Result<Vec<Chunk>, ExecutorError> {
    let (single, multi): (Vec<_>, Vec<_>) = instances
        .into_iter()
        .partition(|instance| instance.task_count <= cores_per_node);

    let mut groups: BTreeMap<usize, Vec<RunInstance>> = BTreeMap::new();
    for instance in multi {
        groups.entry(instance.task_count).or_default().push(instance);
    }

    let reserved: usize = groups
        .keys()
        .map(|task_count| nodes_for(*task_count, cores_per_node))
        .sum();

    if reserved >= max_nodes {
        return Err(ExecutorError::NodeBudget {
            reserved,
            max_nodes,
        });
    }
    let free_nodes = max_nodes - reserved;

    debug!(reserved, free_nodes, single = single.len(), "Partitioning runs");

    let mut chunks = groups
        .into_iter()
        .map(|(task_count, runs)| {
            let nodes = nodes_for(task_count, cores_per_node);

            Chunk {
                nodes,
                tasks_per_node: task_count.div_ceil(nodes),
                runs,
            }
        })
        .collect::<Vec<_>>();

    chunks.extend(
        split_evenly(single, free_nodes + 1)
            .into_iter()
            .map(|runs| Chunk {
                nodes: 1,
                tasks_per_node: runs
                    .iter()
                    .map(|instance| instance.task_count)
                    .max()
                    .unwrap_or(1),
                runs,
            }),
    );

    Ok(chunks)
}
