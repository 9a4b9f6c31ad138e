use crate::config::ConfigErrors;
use benchkit_ingest::ReducePolicy;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing_unwrap::ResultExt;

/// block name -> (field -> raw value)
pub type ParameterBlocks = BTreeMap<String, BTreeMap<String, String>>;

/// block holding everything the scheduler needs to know about a run
pub const META_BLOCK: &str = "BenchmarkMetaData";

static BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*([^\s{};]+)\s*\{([^{}]*)\}").expect_or_log("block pattern")
});
static FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+)\s+([^;]*?)\s*;").expect_or_log("field pattern"));

/// Parse `Name { key value; ... }` blocks, later duplicates win
pub fn parse_parameter_file(text: &str) -> ParameterBlocks {
    BLOCK
        .captures_iter(text)
        .map(|block| {
            let fields = FIELD
                .captures_iter(&block[2])
                .map(|field| (field[1].to_owned(), field[2].to_owned()))
                .collect();

            (block[1].to_owned(), fields)
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterMeta {
    pub pin_threads: bool,
    pub cpu_frequency: Option<String>,
}

/// What a run directory asks the scheduler for, read once per scheduling pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRequest {
    pub binary: PathBuf,
    pub task_count: usize,
    pub repeat_count: usize,
    pub reduce_policy: ReducePolicy,
    pub cluster: ClusterMeta,
}

impl ResourceRequest {
    pub fn load(file: &Path) -> Result<Self, ConfigErrors> {
        let text = fs::read_to_string(file).map_err(|source| ConfigErrors::ReadFailed {
            path: file.to_path_buf(),
            source,
        })?;

        Self::from_parameters(file, &parse_parameter_file(&text))
    }

    /// Relative binary paths are resolved against the parameter file's directory
    pub fn from_parameters(file: &Path, blocks: &ParameterBlocks) -> Result<Self, ConfigErrors> {
        let missing = |field| ConfigErrors::MissingField {
            file: file.to_path_buf(),
            block: META_BLOCK,
            field,
        };
        let meta = blocks.get(META_BLOCK).ok_or_else(|| missing("binary"))?;

        let binary = PathBuf::from(meta.get("binary").ok_or_else(|| missing("binary"))?);
        let binary = match file.parent() {
            Some(directory) if binary.is_relative() => directory.join(binary),
            _ => binary,
        };

        let task_count =
            parse_field::<usize>(file, meta, "tasks")?.ok_or_else(|| missing("tasks"))?;
        let repeat_count = parse_field::<usize>(file, meta, "repeat")?.unwrap_or(1);

        for (field, value) in [("tasks", task_count), ("repeat", repeat_count)] {
            if value == 0 {
                return Err(ConfigErrors::InvalidField {
                    file: file.to_path_buf(),
                    field,
                    value: value.to_string(),
                });
            }
        }

        Ok(Self {
            binary,
            task_count,
            repeat_count,
            reduce_policy: parse_field::<ReducePolicy>(file, meta, "reduce")?
                .unwrap_or_default(),
            cluster: ClusterMeta {
                pin_threads: parse_field::<Flag>(file, meta, "pin_threads")?
                    .map_or(false, |flag| flag.0),
                cpu_frequency: meta.get("cpu_frequency").cloned(),
            },
        })
    }
}

fn parse_field<T: FromStr>(
    file: &Path,
    block: &BTreeMap<String, String>,
    field: &'static str,
) -> Result<Option<T>, ConfigErrors> {
    block
        .get(field)
        .map(|value| {
            value.parse::<T>().map_err(|_| ConfigErrors::InvalidField {
                file: file.to_path_buf(),
                field,
                value: value.clone(),
            })
        })
        .transpose()
}

/// boolean spelled the way parameter files do
struct Flag(bool);

impl FromStr for Flag {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "true" | "1" => Ok(Self(true)),
            "false" | "0" => Ok(Self(false)),
            _ => Err(()),
        }
    }
}
