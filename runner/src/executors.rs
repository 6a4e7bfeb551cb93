mod local;
mod pool;
mod progress;
mod protocol;
pub mod worker;

pub use local::{resolve_processes, LocalExecutor, DEFAULT_SHUTDOWN_GRACE};
pub use pool::{interrupt, interrupted, WorkerCommand};
pub use progress::{Progress, TerminalProgress};
pub use protocol::{Outcome, Request, Response};

use crate::experiments::Experiment;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("The number of worker processes must be at least 1")]
    InvalidProcessCount,
    #[error("Failed to locate the current executable")]
    CurrentExe(#[source] std::io::Error),
    #[error("Failed to spawn worker process {program:?}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Worker process {pid} was started without pipes")]
    MissingPipes { pid: u32 },
    #[error("Failed to serialize unit input")]
    Serialize(#[source] serde_json::Error),
    #[error("Worker sent an unreadable response for unit {seq}")]
    Protocol {
        seq: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Worker answered unit {received} while unit {expected} was expected")]
    SequenceMismatch { expected: usize, received: usize },
    #[error("Unit {index} ({unit}) failed: {message}")]
    UnitFailed {
        index: usize,
        unit: String,
        message: String,
    },
    #[error("Worker {worker} (pid {pid}) exited before finishing its unit")]
    WorkerExited { worker: usize, pid: u32 },
    #[error("All workers exited after {completed} of {total} units")]
    PoolExhausted { completed: usize, total: usize },
    #[error("Dispatch was interrupted")]
    Interrupted,
}

/// Map `run_fn` over `items` with `processes` worker processes of the current executable,
/// reporting progress on the terminal.
///
/// The executable has to answer the `worker` subcommand, see `worker::serve`.
pub fn map_processes<E: Experiment>(
    run_fn: &E,
    items: &[E::Input],
    processes: Option<usize>,
) -> Result<(), ExecutorError> {
    let processes = resolve_processes(processes)?;

    LocalExecutor::new(WorkerCommand::current_exe()?, Some(processes))?.map(
        run_fn,
        items,
        &mut TerminalProgress::new(),
    )
}
