use super::{slurm::SlurmExecutor, ExecutorError, Outcome};
use crate::{
    batch::{BatchSystem, QueueStatus},
    collector::RunDirectory,
    config::{compile_config_glob, RunnerConfig},
    shutdown::ShutdownHandle,
};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::TempDir;

/// In-memory queue: every job is listed as pending once, then disappears
#[derive(Debug, Default)]
struct FakeQueue {
    scripts: Mutex<Vec<String>>,
    polled: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    // the n-th submission (counting from 1) is rejected
    reject: Option<usize>,
    // interrupts sent to the handle during the first submission
    interrupt: Option<(ShutdownHandle, usize)>,
}

impl BatchSystem for FakeQueue {
    fn submit(&self, script: &Path) -> Result<String, ExecutorError> {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.push(fs::read_to_string(script).unwrap());

        if let Some((shutdown, count)) = &self.interrupt {
            if scripts.len() == 1 {
                (0..*count).for_each(|_| shutdown.shutdown());
            }
        }

        if self.reject == Some(scripts.len()) {
            return Err(ExecutorError::Submission {
                script: script.to_path_buf(),
                output: "sbatch: error: Batch job submission failed".to_owned(),
            });
        }

        Ok(format!("{}", 100 + scripts.len()))
    }

    fn status(&self, id: &str) -> Result<QueueStatus, ExecutorError> {
        let mut polled = self.polled.lock().unwrap();
        let seen = polled.iter().any(|job| job == id);
        polled.push(id.to_owned());

        Ok(if seen {
            QueueStatus::Absent
        } else {
            QueueStatus::Pending
        })
    }

    fn cancel(&self, id: &str) -> Result<(), ExecutorError> {
        self.cancelled.lock().unwrap().push(id.to_owned());
        Ok(())
    }
}

fn run_directory(root: &Path, name: &str, meta: &str) -> RunDirectory {
    let directory = root.join(name);
    fs::create_dir_all(&directory).unwrap();
    fs::write(
        directory.join("run.prm"),
        format!("BenchmarkMetaData {{\n{meta}\n}}\n"),
    )
    .unwrap();

    RunDirectory::load(&directory, &compile_config_glob("*.prm").unwrap()).unwrap()
}

fn config(job_dir: &Path, extra: &str) -> RunnerConfig {
    RunnerConfig::parse(&format!(
        "executor:\n  name: slurm\n  cores_per_node: 8\n  max_nodes: 3\n  job_dir: {}\n{extra}build: []\npoll_unit_ms: 1\n",
        job_dir.display()
    ))
    .unwrap()
}

fn executor(config: &RunnerConfig, shutdown: ShutdownHandle) -> (SlurmExecutor, Arc<FakeQueue>) {
    executor_with(config, shutdown, FakeQueue::default())
}

fn executor_with(
    config: &RunnerConfig,
    shutdown: ShutdownHandle,
    queue: FakeQueue,
) -> (SlurmExecutor, Arc<FakeQueue>) {
    let queue = Arc::new(queue);
    let executor = SlurmExecutor::with_batch_system(config, shutdown, queue.clone()).unwrap();

    (executor, queue)
}

#[test]
pub fn submits_every_chunk_and_polls_until_absent() {
    let root = TempDir::new().unwrap();
    let jobs: PathBuf = root.path().join("jobs");
    let wide = run_directory(root.path(), "wide", "binary ./bench;\ntasks 16;");
    let narrow = run_directory(
        root.path(),
        "narrow",
        "binary ./bench;\ntasks 4;\nrepeat 3;\npin_threads true;\ncpu_frequency 2000000;",
    );

    let (mut executor, queue) = executor(&config(&jobs, ""), ShutdownHandle::new());
    let runs = [wide.clone(), narrow.clone()];

    let outcome = executor.execute(&runs).unwrap();
    assert_eq!(outcome, Outcome::Completed);

    // 2 nodes reserved for the wide run, the 3 narrow repetitions spread over 2 chunks
    let scripts = queue.scripts.lock().unwrap();
    assert_eq!(scripts.len(), 3);
    assert!(jobs.join("chunk0.sh").is_file());

    assert!(scripts[0].contains("#SBATCH --nodes=2\n"));
    assert!(scripts[0].contains("#SBATCH --ntasks-per-node=8\n"));
    assert!(scripts[0].contains("--nodes=2 --ntasks=16"));
    assert!(scripts[0].contains(&format!("> {} 2>&1", wide.log_path(0).display())));

    assert!(scripts[1].contains("#SBATCH --nodes=1\n"));
    assert_eq!(scripts[1].matches("srun ").count(), 2);
    assert_eq!(scripts[2].matches("srun ").count(), 1);
    assert!(scripts[1].contains("--cpu-bind=cores --cpu-freq=2000000"));
    assert!(scripts[2].contains(&narrow.log_path(2).display().to_string()));

    // every job reported pending once, then gone
    assert_eq!(queue.polled.lock().unwrap().len(), 6);
    assert!(queue.cancelled.lock().unwrap().is_empty());
}

#[test]
pub fn large_jobs_get_extra_flags() {
    let root = TempDir::new().unwrap();
    let wide = run_directory(root.path(), "wide", "binary ./bench;\ntasks 16;");
    let config = config(
        &root.path().join("jobs"),
        "  large_job:\n    min_nodes: 2\n    flags: --partition=large\n",
    );

    let (executor, _) = executor(&config, ShutdownHandle::new());
    let runs = [wide];
    let chunks = executor.plan(&runs).unwrap();

    assert!(executor
        .render_script(&chunks[0], &runs)
        .contains("#SBATCH --partition=large\n"));
}

#[test]
pub fn node_budget_fails_before_submission() {
    let root = TempDir::new().unwrap();
    let wide = run_directory(root.path(), "wide", "binary ./bench;\ntasks 24;");
    let narrow = run_directory(root.path(), "narrow", "binary ./bench;\ntasks 1;");
    fs::write(narrow.path.join("old.log"), "kept").unwrap();

    let (mut executor, queue) = executor(&config(&root.path().join("jobs"), ""), ShutdownHandle::new());

    assert!(matches!(
        executor.execute(&[wide, narrow.clone()]),
        Err(ExecutorError::NodeBudget {
            reserved: 3,
            max_nodes: 3
        })
    ));
    assert!(queue.scripts.lock().unwrap().is_empty());
    // nothing was cleaned either
    assert!(narrow.path.join("old.log").exists());
}

#[test]
pub fn interrupt_stops_submission() {
    let root = TempDir::new().unwrap();
    let run = run_directory(root.path(), "NG", "binary ./bench;\ntasks 2;\nrepeat 4;");

    let shutdown = ShutdownHandle::new();
    shutdown.shutdown();

    let (mut executor, queue) = executor(&config(&root.path().join("jobs"), ""), shutdown);

    assert_eq!(executor.execute(&[run]).unwrap(), Outcome::Interrupted);
    assert!(queue.scripts.lock().unwrap().is_empty());
}

#[test]
pub fn failed_submission_cancels_submitted_chunks() {
    let root = TempDir::new().unwrap();
    let run = run_directory(root.path(), "NG", "binary ./bench;\ntasks 2;\nrepeat 4;");

    let queue = FakeQueue {
        reject: Some(2),
        ..FakeQueue::default()
    };
    let (mut executor, queue) = executor_with(
        &config(&root.path().join("jobs"), ""),
        ShutdownHandle::new(),
        queue,
    );

    assert!(matches!(
        executor.execute(&[run]),
        Err(ExecutorError::Submission { .. })
    ));
    assert_eq!(queue.scripts.lock().unwrap().len(), 2);
    assert_eq!(*queue.cancelled.lock().unwrap(), vec!["101".to_owned()]);
}

#[test]
pub fn interrupt_after_submission_waits_for_submitted_chunks() {
    let root = TempDir::new().unwrap();
    let run = run_directory(root.path(), "NG", "binary ./bench;\ntasks 2;\nrepeat 4;");

    let shutdown = ShutdownHandle::new();
    let queue = FakeQueue {
        interrupt: Some((shutdown.clone(), 1)),
        ..FakeQueue::default()
    };
    let (mut executor, queue) =
        executor_with(&config(&root.path().join("jobs"), ""), shutdown, queue);

    assert_eq!(executor.execute(&[run]).unwrap(), Outcome::Interrupted);
    assert_eq!(queue.scripts.lock().unwrap().len(), 1);
    // pending once, then gone
    assert_eq!(
        *queue.polled.lock().unwrap(),
        vec!["101".to_owned(), "101".to_owned()]
    );
    assert!(queue.cancelled.lock().unwrap().is_empty());
}

#[test]
pub fn second_interrupt_cancels_submitted_chunks() {
    let root = TempDir::new().unwrap();
    let run = run_directory(root.path(), "NG", "binary ./bench;\ntasks 2;\nrepeat 4;");

    let shutdown = ShutdownHandle::new();
    let queue = FakeQueue {
        interrupt: Some((shutdown.clone(), 2)),
        ..FakeQueue::default()
    };
    let (mut executor, queue) =
        executor_with(&config(&root.path().join("jobs"), ""), shutdown, queue);

    assert!(matches!(
        executor.execute(&[run]),
        Err(ExecutorError::Aborted)
    ));
    assert_eq!(queue.scripts.lock().unwrap().len(), 1);
    assert_eq!(*queue.cancelled.lock().unwrap(), vec!["101".to_owned()]);
}
