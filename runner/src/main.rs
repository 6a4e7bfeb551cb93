use clap::{Args, Parser, Subcommand};
use std::{
    error::Error as _,
    fs, io,
    path::{Path, PathBuf},
    process,
};
use testbed_runner::{
    agents::Agents,
    config::{ConfigErrors, TestbedConfig},
    datasets::{self, DatasetKind},
    executors::{
        self,
        worker::{self, WorkerError},
        ExecutorError, LocalExecutor, TerminalProgress, WorkerCommand,
    },
    experiments::{
        probe::{parse_delay, Probe},
        trainer::TrainerExperiment,
        Experiment,
    },
    problems::ProblemId,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "testbed", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug output, RUST_LOG takes precedence
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train and evaluate the configured agent on every selected problem
    Run {
        #[arg(short, long)]
        config: PathBuf,

        /// Number of worker processes, overrides executor.processes
        #[arg(short, long)]
        processes: Option<usize>,

        /// Problems to run instead of the ones selected in the config
        #[arg(long = "problem")]
        problems: Vec<ProblemId>,
    },
    /// Dispatch the diagnostic probe over IDS to check the worker pool
    Probe {
        ids: Vec<String>,

        #[arg(short, long)]
        processes: Option<usize>,

        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// Print the default config and the hyperparameter sweep of an agent
    Sweep {
        #[arg(value_enum)]
        agent: Agents,
    },
    /// List the real datasets known to the testbed
    Datasets {
        /// Only list the names of datasets of this kind
        #[arg(long, value_enum)]
        kind: Option<DatasetKind>,

        /// Only list datasets of the first release, requires --kind
        #[arg(long, requires = "kind")]
        original: bool,

        /// List every dataset with the tau values it is evaluated at
        #[arg(long, conflicts_with = "kind")]
        settings: bool,
    },
    /// Serve units of an experiment over stdin/stdout
    #[command(hide = true)]
    Worker {
        experiment: String,

        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        probe: ProbeArgs,
    },
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Delay the unit ID by MS milliseconds
    #[arg(long = "delay", value_name = "ID=MS", value_parser = parse_delay)]
    delays: Vec<(String, u64)>,

    /// Fail the unit ID
    #[arg(long = "fail", value_name = "ID")]
    failures: Vec<String>,

    /// Append `<pid>\t<id>` for every invocation to FILE
    #[arg(long, value_name = "FILE")]
    ledger: Option<PathBuf>,
}

impl ProbeArgs {
    fn into_probe(self) -> Probe {
        let probe = self
            .delays
            .into_iter()
            .fold(Probe::default(), |probe, (id, millis)| probe.with_delay(id, millis));
        let probe = self
            .failures
            .into_iter()
            .fold(probe, |probe, id| probe.with_failure(id));

        match self.ledger {
            Some(ledger) => probe.with_ledger(ledger),
            None => probe,
        }
    }
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("No problems selected, set problems in the config or pass --problem")]
    NoProblems,
    #[error("Unknown experiment '{0}'")]
    UnknownExperiment(String),
    #[error("The {0} worker needs --config")]
    MissingConfig(&'static str),
    #[error("Failed to render output")]
    Render(#[from] serde_yaml::Error),
    #[error("Failed to install the signal handler")]
    SignalHandler(#[from] ctrlc::Error),
}

fn setup_logging(verbose: bool, worker: bool) {
    let default = match (verbose, worker) {
        (true, _) => "debug",
        (false, true) => "warn",
        (false, false) => "info",
    };

    // stdout belongs to the protocol in workers and to command output otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

/// SIGINT, SIGTERM and SIGHUP stop the worker pools instead of orphaning them
fn install_interrupt_handler() -> Result<(), CliError> {
    ctrlc::set_handler(|| {
        warn!("Interrupted, stopping workers");
        executors::interrupt();
    })?;

    Ok(())
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose, matches!(cli.command, Commands::Worker { .. }));

    if let Err(e) = run(cli.command) {
        error!("{e}");

        let mut source = e.source();
        while let Some(cause) = source {
            error!("  caused by: {cause}");
            source = cause.source();
        }

        process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Run {
            config,
            processes,
            problems,
        } => run_trainer(&config, processes, problems),
        Commands::Probe {
            ids,
            processes,
            probe,
        } => {
            install_interrupt_handler()?;

            Ok(executors::map_processes(&probe.into_probe(), &ids, processes)?)
        }
        Commands::Sweep { agent } => {
            print!("{}", serde_yaml::to_string(&agent.catalog()?)?);

            Ok(())
        }
        Commands::Datasets {
            kind,
            original,
            settings,
        } => {
            let rendered = match kind {
                Some(kind) if original => serde_yaml::to_string(&datasets::original(kind))?,
                Some(kind) => serde_yaml::to_string(&datasets::names(kind))?,
                None if settings => serde_yaml::to_string(&datasets::settings())?,
                None => serde_yaml::to_string(&*datasets::DATASETS)?,
            };
            print!("{rendered}");

            Ok(())
        }
        Commands::Worker {
            experiment,
            config,
            probe,
        } => {
            if experiment == Probe::NAME {
                serve(&probe.into_probe())
            } else if experiment == TrainerExperiment::NAME {
                let path = config.ok_or(CliError::MissingConfig(TrainerExperiment::NAME))?;
                let config = TestbedConfig::load(&path)?;

                serve(&TrainerExperiment::load(&path, &config)?)
            } else {
                Err(CliError::UnknownExperiment(experiment))
            }
        }
    }
}

fn run_trainer(
    path: &Path,
    processes: Option<usize>,
    problems: Vec<ProblemId>,
) -> Result<(), CliError> {
    // workers may run from another directory
    let path = fs::canonicalize(path).map_err(|source| ConfigErrors::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = TestbedConfig::load(&path)?;

    if config.preflight_checks() {
        return Err(ConfigErrors::FailedPreflight.into());
    }

    let problems = if problems.is_empty() {
        config.problems.expand().map_err(ConfigErrors::from)?
    } else {
        problems
    };

    if problems.is_empty() {
        return Err(CliError::NoProblems);
    }

    let experiment = TrainerExperiment::load(&path, &config)?;
    install_interrupt_handler()?;
    info!(
        agent = %experiment.agent().agent,
        sweep_id = ?experiment.agent().sweep_id,
        "Running {} problems",
        problems.len()
    );

    let executor = LocalExecutor::new(
        WorkerCommand::current_exe()?,
        processes.or(config.executor.processes),
    )?
    .with_shutdown_grace(config.executor.shutdown_grace());

    Ok(executor.map(&experiment, &problems, &mut TerminalProgress::new())?)
}

fn serve<E: Experiment>(experiment: &E) -> Result<(), CliError> {
    let served = worker::serve(experiment, io::stdin().lock(), io::stdout().lock())?;
    debug!("Worker served {served} units");

    Ok(())
}
