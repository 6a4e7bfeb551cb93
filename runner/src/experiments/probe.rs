use super::Experiment;
use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsString,
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    process, thread,
    time::Duration,
};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to append to the probe ledger")]
    Ledger(#[from] std::io::Error),
    #[error("Probe failure requested for {0}")]
    Requested(String),
}

/// Diagnostic run function for checking a worker pool on a host.
///
/// Echoes its input, optionally after a per-input delay, fails for selected inputs and
/// appends `<pid>\t<input>` to a ledger file for every invocation.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    delays: BTreeMap<String, u64>,
    failures: BTreeSet<String>,
    ledger: Option<PathBuf>,
}

impl Probe {
    pub fn with_delay(mut self, input: impl Into<String>, millis: u64) -> Self {
        self.delays.insert(input.into(), millis);
        self
    }

    pub fn with_failure(mut self, input: impl Into<String>) -> Self {
        self.failures.insert(input.into());
        self
    }

    pub fn with_ledger(mut self, ledger: impl Into<PathBuf>) -> Self {
        self.ledger = Some(ledger.into());
        self
    }
}

/// parse `INPUT=MILLIS`, split at the last `=`
pub fn parse_delay(value: &str) -> Result<(String, u64), String> {
    let (input, millis) = value
        .rsplit_once('=')
        .ok_or_else(|| format!("expected INPUT=MILLIS, got '{value}'"))?;
    let millis = millis
        .parse()
        .map_err(|error| format!("invalid delay in '{value}': {error}"))?;

    Ok((input.to_string(), millis))
}

impl Experiment for Probe {
    const NAME: &'static str = "probe";

    type Input = String;
    type Output = String;
    type Error = ProbeError;

    fn worker_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();

        for (input, millis) in self.delays.iter() {
            args.push(OsString::from("--delay"));
            args.push(OsString::from(format!("{input}={millis}")));
        }
        for input in self.failures.iter() {
            args.push(OsString::from("--fail"));
            args.push(OsString::from(input));
        }
        if let Some(ledger) = &self.ledger {
            args.push(OsString::from("--ledger"));
            args.push(ledger.clone().into_os_string());
        }

        args
    }

    fn run(&self, input: String) -> Result<String, ProbeError> {
        if let Some(ledger) = &self.ledger {
            let mut file = OpenOptions::new().create(true).append(true).open(ledger)?;
            file.write_all(format!("{}\t{input}\n", process::id()).as_bytes())?;
        }

        if let Some(millis) = self.delays.get(&input) {
            trace!("Delaying {input} by {millis} ms");
            thread::sleep(Duration::from_millis(*millis));
        }

        if self.failures.contains(&input) {
            return Err(ProbeError::Requested(input));
        }

        Ok(input)
    }
}
