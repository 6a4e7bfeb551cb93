use super::Experiment;
use crate::{
    agents::AgentSpec,
    config::{ConfigErrors, ResultsConfig, TestbedConfig, TrainerConfig},
    ingest::{parse_records, IngestError, RunOutput},
    problems::ProblemId,
    results::{ResultsError, ResultsLogger},
};
use std::{
    ffi::OsString,
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};
use wait_timeout::ChildExt;

#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("Failed to spawn trainer {exec:?}")]
    Spawn {
        exec: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to wait for the trainer process")]
    Wait(#[source] std::io::Error),
    #[error("Trainer ran into the timeout of {0:?}")]
    Timeout(Duration),
    #[error("Trainer exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },
    #[error("Failed to serialize the agent config")]
    AgentConfig(#[from] serde_json::Error),
    #[error("Failed to ingest trainer metrics")]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Results(#[from] ResultsError),
}

/// Runs one agent against one problem with the external trainer and logs the metrics as csv
#[derive(Debug, Clone)]
pub struct TrainerExperiment {
    config_path: PathBuf,
    agent: AgentSpec,
    trainer: TrainerConfig,
    results: ResultsConfig,
}

impl TrainerExperiment {
    /// `config_path` is handed to workers, which load it again to rebuild the experiment
    pub fn load(config_path: &Path, config: &TestbedConfig) -> Result<Self, ConfigErrors> {
        Ok(Self {
            config_path: config_path.to_path_buf(),
            agent: config.agent.resolve()?,
            trainer: config.trainer.clone(),
            results: config.results.clone(),
        })
    }

    pub fn agent(&self) -> &AgentSpec {
        &self.agent
    }

    fn train(&self, problem: &ProblemId) -> Result<RunOutput, TrainerError> {
        let timeout = Duration::from_secs(self.trainer.timeout);
        let agent_config = serde_json::to_string(&self.agent.config)?;
        let start = Instant::now();

        let mut child = Command::new(&self.trainer.exec)
            .args(self.trainer.params.iter())
            .arg("--problem-id")
            .arg(problem.as_str())
            .arg("--agent")
            .arg(self.agent.agent.to_string())
            .arg("--agent-config")
            .arg(agent_config)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TrainerError::Spawn {
                exec: self.trainer.exec.clone(),
                source,
            })?;
        debug!(pid = child.id(), "Started trainer");

        // both pipes are drained while waiting on the trainer
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match child.wait_timeout(timeout).map_err(TrainerError::Wait)? {
            Some(status) => status,
            None => {
                warn!(pid = child.id(), "Trainer ran into timeout, killing it");

                if let Err(error) = child.kill() {
                    debug!(error = ?error, "Failed to kill trainer");
                }
                child.wait().map_err(TrainerError::Wait)?;

                return Err(TrainerError::Timeout(timeout));
            }
        };

        let output = RunOutput {
            runtime: start.elapsed(),
            stdout: stdout.map(join).unwrap_or_default(),
            stderr: stderr.map(join).unwrap_or_default(),
            status: status.code(),
        };

        debug!(
            "Finished in {} ms | status: {}",
            output.runtime.as_millis(),
            status.success()
        );
        trace!("Output: {}", output.stdout);

        if status.success() {
            Ok(output)
        } else {
            Err(TrainerError::Failed {
                status: output.status,
                stderr: output.stderr.trim_end().to_string(),
            })
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();

        if let Err(error) = pipe.read_to_end(&mut buffer) {
            debug!(error = ?error, "Failed to read trainer output");
        }

        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn join(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

impl Experiment for TrainerExperiment {
    const NAME: &'static str = "trainer";

    type Input = ProblemId;
    type Output = ProblemId;
    type Error = TrainerError;

    fn worker_args(&self) -> Vec<OsString> {
        vec![
            OsString::from("--config"),
            self.config_path.clone().into_os_string(),
        ]
    }

    #[instrument(skip(self), fields(agent = %self.agent.agent, sweep_id = ?self.agent.sweep_id))]
    fn run(&self, problem: ProblemId) -> Result<ProblemId, TrainerError> {
        if let Some(dataset) = problem.dataset() {
            debug!(
                kind = ?dataset.kind,
                num_train = dataset.num_train,
                num_test = dataset.num_test,
                "Real data problem"
            );
        }

        let logger = ResultsLogger::prepare(&self.results.dir, &problem, self.results.overwrite)?;
        let output = self.train(&problem)?;
        let records = parse_records(&output.stdout)?;
        let path = logger.log(&problem, &self.agent, &records)?;

        info!(path = ?path, rows = records.len(), "Logged results for {problem}");

        Ok(problem)
    }
}
