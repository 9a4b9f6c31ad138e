use crate::{
    collector::{discover, find_single_config, is_run_directory, load_run_directories},
    config::{compile_config_glob, ConfigErrors},
};
use std::{fs, path::Path};
use tempfile::TempDir;

const META: &str = "BenchmarkMetaData { binary ./bench; tasks 2; }\n";

fn touch(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
pub fn exactly_one_parameter_file_makes_a_leaf() {
    let root = TempDir::new().unwrap();
    let matcher = compile_config_glob("*.prm").unwrap();

    touch(&root.path().join("one/run.prm"), META);
    touch(&root.path().join("two/a.prm"), META);
    touch(&root.path().join("two/b.prm"), META);
    touch(&root.path().join("none/notes.txt"), "");

    assert!(is_run_directory(&root.path().join("one"), &matcher).unwrap());
    assert!(!is_run_directory(&root.path().join("two"), &matcher).unwrap());
    assert!(!is_run_directory(&root.path().join("none"), &matcher).unwrap());

    assert!(matches!(
        find_single_config(&root.path().join("two"), &matcher),
        Err(ConfigErrors::MultipleConfigs(_, files)) if files.len() == 2
    ));
    assert!(matches!(
        find_single_config(&root.path().join("none"), &matcher),
        Err(ConfigErrors::NoConfig(_))
    ));
}

#[test]
pub fn discovers_nested_leaves_in_stable_order() {
    let root = TempDir::new().unwrap();
    let matcher = compile_config_glob("*.prm").unwrap();

    touch(&root.path().join("suite/b/run.prm"), META);
    touch(&root.path().join("suite/a/run.prm"), META);
    touch(&root.path().join("suite/a/refined/run.prm"), META);
    touch(&root.path().join("suite/c/.hidden/run.prm"), META);
    touch(&root.path().join("suite/d/readme.md"), "");

    let leaves = discover(&[root.path().join("suite")], &matcher).unwrap();
    let relative = leaves
        .iter()
        .map(|leaf| leaf.strip_prefix(root.path()).unwrap().to_path_buf())
        .collect::<Vec<_>>();

    assert_eq!(
        relative,
        vec![
            Path::new("suite/a").to_path_buf(),
            Path::new("suite/a/refined").to_path_buf(),
            Path::new("suite/b").to_path_buf(),
            Path::new("suite/c/.hidden").to_path_buf(),
        ]
    );
}

#[test]
pub fn multiple_roots_are_walked_in_order() {
    let root = TempDir::new().unwrap();
    let matcher = compile_config_glob("*.prm").unwrap();

    touch(&root.path().join("z/run.prm"), META);
    touch(&root.path().join("a/run.prm"), META);

    let leaves = discover(&[root.path().join("z"), root.path().join("a")], &matcher).unwrap();

    assert_eq!(leaves, vec![root.path().join("z"), root.path().join("a")]);
}

#[test]
pub fn broken_parameter_file_aborts_loading() {
    let root = TempDir::new().unwrap();
    let matcher = compile_config_glob("*.prm").unwrap();

    touch(&root.path().join("ok/run.prm"), META);
    touch(&root.path().join("broken/run.prm"), "BenchmarkMetaData { tasks 2; }");

    assert!(matches!(
        load_run_directories(&[root.path()], &matcher),
        Err(ConfigErrors::MissingField { field: "binary", .. })
    ));
}

#[test]
pub fn run_directory_cleans_logs_only() {
    let root = TempDir::new().unwrap();
    let matcher = compile_config_glob("*.prm").unwrap();

    touch(&root.path().join("NG/run.prm"), META);
    touch(&root.path().join("NG/run0.log"), "old");
    touch(&root.path().join("NG/run1.log"), "old");
    touch(&root.path().join("NG/input.dat"), "keep");

    let runs = load_run_directories(&[root.path()], &matcher).unwrap();
    assert_eq!(runs.len(), 1);

    let run = &runs[0];
    assert_eq!(run.name(), "NG");
    assert_eq!(run.request.task_count, 2);
    assert_eq!(run.log_path(1), run.path.join("run1.log"));

    assert_eq!(run.clean().unwrap(), 2);
    assert!(!run.log_path(0).exists());
    assert!(run.path.join("input.dat").exists());
    assert!(run.config.exists());
}
