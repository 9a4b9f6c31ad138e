mod backoff;
mod batch;
mod builder;
mod collector;
mod config;
mod executors;
mod jobs;
mod params;
mod report;
mod shutdown;

#[cfg(test)]
mod batch_test;
#[cfg(test)]
mod collector_test;
#[cfg(test)]
mod shutdown_test;

use benchkit_ingest::XAxis;
use clap::{Args, Parser, Subcommand};
use collector::{load_run_directories, RunDirectory};
use config::{compile_config_glob, ConfigErrors, ExecutorConfig, RunnerConfig};
use executors::{slurm::SlurmExecutor, ExecutorError, Executors, Outcome};
use itertools::Itertools;
use report::{compare_runs, plot_run, ReportError, Selection};
use shutdown::ShutdownHandle;
use std::{
    path::{Path, PathBuf},
    process::exit,
};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Runner config selecting the executor
    #[arg(short, long, global = true, default_value = "benchkit.yaml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every run directory below the given directories
    List {
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
    /// Print how runs would be chunked for the cluster, without submitting
    Plan {
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
    /// Execute every run directory and wait for completion
    Run(RunArgs),
    /// Extract, reduce and write graphs of finished runs
    Plot(PlotArgs),
    /// `run` followed by `plot` on the same directories
    Benchmark {
        #[command(flatten)]
        run: RunArgs,
        #[command(flatten)]
        plot: PlotOptions,
    },
    /// Graphs of several run directories in one comparison
    Compare {
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
        #[arg(long, value_delimiter = ',', required = true)]
        benchmarks: Vec<String>,
        #[arg(long, value_delimiter = ',', required = true)]
        metrics: Vec<String>,
        #[arg(long)]
        x_metric: Option<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(required = true)]
    dirs: Vec<PathBuf>,
    /// Task slots shared by concurrent local jobs
    #[arg(long)]
    budget: Option<usize>,
}

#[derive(Args, Debug)]
struct PlotArgs {
    #[arg(required = true)]
    dirs: Vec<PathBuf>,
    #[command(flatten)]
    options: PlotOptions,
}

#[derive(Args, Debug, Clone)]
struct PlotOptions {
    /// Benchmarks plotted together
    #[arg(long, value_delimiter = ',', conflicts_with = "for_each")]
    benchmarks: Option<Vec<String>>,
    /// Benchmarks plotted one file each
    #[arg(long, value_delimiter = ',')]
    for_each: Option<Vec<String>>,
    #[arg(long, value_delimiter = ',')]
    metrics: Option<Vec<String>>,
    /// Metric used as x-axis instead of the iteration
    #[arg(long)]
    x_metric: Option<String>,
}

impl PlotOptions {
    fn selection(&self) -> Selection {
        match (&self.benchmarks, &self.for_each) {
            (Some(names), _) => Selection::Benchmarks(names.clone()),
            (None, Some(names)) => Selection::ForEach(names.clone()),
            (None, None) => Selection::All,
        }
    }
}

fn axis(x_metric: &Option<String>) -> XAxis {
    x_metric.clone().map_or(XAxis::Iteration, XAxis::Metric)
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("Failed to install interrupt handling: {0}")]
    Signal(#[from] nix::Error),
}

fn discover_runs(config: &Path, dirs: &[PathBuf]) -> Result<Vec<RunDirectory>, ConfigErrors> {
    let matcher = compile_config_glob(&RunnerConfig::discovery_glob(config)?)?;

    load_run_directories(dirs, &matcher)
}

fn load_config(path: &Path, budget: Option<usize>) -> Result<RunnerConfig, ConfigErrors> {
    let mut config = RunnerConfig::load(path)?;

    if let Some(value) = budget {
        match &mut config.executor {
            ExecutorConfig::Local { budget, .. } => *budget = Some(value),
            ExecutorConfig::Slurm { .. } => warn!("--budget only applies to the local executor"),
        }
    }

    if config.preflight_checks() {
        return Err(ConfigErrors::Preflight);
    }

    Ok(config)
}

fn list(config: &Path, dirs: &[PathBuf]) -> Result<(), CliError> {
    for run in discover_runs(config, dirs)? {
        let request = &run.request;
        println!(
            "{}\ttasks={} repeat={} reduce={} binary={}",
            run.path.display(),
            request.task_count,
            request.repeat_count,
            request.reduce_policy,
            request.binary.display()
        );
    }

    Ok(())
}

fn plan(config_path: &Path, dirs: &[PathBuf]) -> Result<(), CliError> {
    let config = load_config(config_path, None)?;
    let runs = load_run_directories(dirs, &config.config_matcher()?)?;
    // nothing is dispatched, interrupts keep their default behaviour
    let executor = SlurmExecutor::load(&config, ShutdownHandle::new())?;

    for (index, chunk) in executor.plan(&runs)?.iter().enumerate() {
        println!(
            "chunk{index}: {} nodes, {} tasks per node",
            chunk.nodes, chunk.tasks_per_node
        );

        for instance in &chunk.runs {
            println!(
                "  {} #{} ({} tasks)",
                runs[instance.run].path.display(),
                instance.repetition,
                instance.task_count
            );
        }
    }

    Ok(())
}

fn run(config_path: &Path, args: &RunArgs) -> Result<Outcome, CliError> {
    let config = load_config(config_path, args.budget)?;
    let runs = load_run_directories(&args.dirs, &config.config_matcher()?)?;

    // blocks SIGINT, no other thread exists yet
    let shutdown = shutdown::start_interrupt_listener()?;

    let mut executor = Executors::load(&config, shutdown)?;
    let outcome = executor.execute(&runs)?;

    match outcome {
        Outcome::Completed => info!("All {} run directories finished", runs.len()),
        Outcome::Interrupted => warn!("Interrupted, not every run was executed"),
    }

    Ok(outcome)
}

fn plot(config: &Path, dirs: &[PathBuf], options: &PlotOptions) -> Result<(), CliError> {
    let selection = options.selection();
    let axis = axis(&options.x_metric);

    for run in discover_runs(config, dirs)? {
        plot_run(&run, &selection, options.metrics.as_deref(), &axis)?;
    }

    Ok(())
}

fn compare(
    config: &Path,
    dirs: &[PathBuf],
    benchmarks: &[String],
    metrics: &[String],
    x_metric: &Option<String>,
) -> Result<(), CliError> {
    let runs = discover_runs(config, dirs)?;
    let names = runs.iter().map(RunDirectory::name).join(", ");
    info!("Comparing {names}");

    let path = compare_runs(&runs, benchmarks, metrics, &axis(x_metric), Path::new("."))?;
    println!("{}", path.display());

    Ok(())
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    match &cli.command {
        Commands::List { dirs } => list(&cli.config, dirs),
        Commands::Plan { dirs } => plan(&cli.config, dirs),
        Commands::Run(args) => run(&cli.config, args).map(|_| ()),
        Commands::Plot(args) => plot(&cli.config, &args.dirs, &args.options),
        Commands::Benchmark { run: args, plot: options } => {
            match run(&cli.config, args)? {
                Outcome::Completed => plot(&cli.config, &args.dirs, options),
                Outcome::Interrupted => Ok(()),
            }
        }
        Commands::Compare {
            dirs,
            benchmarks,
            metrics,
            x_metric,
        } => compare(&cli.config, dirs, benchmarks, metrics, x_metric),
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    if let Err(e) = dispatch(cli) {
        error!("{e}");
        exit(1);
    }
}
