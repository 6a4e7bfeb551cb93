use super::protocol::{Outcome, Request, Response};
use crate::experiments::Experiment;
use std::io::{BufRead, Write};
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to communicate with the parent process")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode unit request")]
    Decode(#[source] serde_json::Error),
    #[error("Failed to encode unit response")]
    Encode(#[source] serde_json::Error),
}

/// Serve units of `experiment` until `input` is closed.
///
/// Every request line is answered with exactly one response line, failures of the
/// experiment itself are reported back instead of ending the loop. Returns the number of
/// units served.
#[instrument(skip_all, fields(experiment = E::NAME, pid = std::process::id()))]
pub fn serve<E, R, W>(experiment: &E, input: R, mut output: W) -> Result<usize, WorkerError>
where
    E: Experiment,
    R: BufRead,
    W: Write,
{
    let mut served = 0;

    for line in input.lines() {
        let line = line?;

        if line.trim().is_empty() {
            continue;
        }

        let request: Request<E::Input> =
            serde_json::from_str(&line).map_err(WorkerError::Decode)?;
        debug!(seq = request.seq, "Running unit");

        let outcome = match experiment.run(request.input) {
            Ok(value) => Outcome::Ok(value),
            Err(error) => {
                warn!(seq = request.seq, "Unit failed: {error}");

                Outcome::Err(error.to_string())
            }
        };

        serde_json::to_writer(
            &mut output,
            &Response {
                seq: request.seq,
                outcome,
            },
        )
        .map_err(WorkerError::Encode)?;
        output.write_all(b"\n")?;
        output.flush()?;

        served += 1;
    }

    debug!("Input closed after {served} units");

    Ok(served)
}
