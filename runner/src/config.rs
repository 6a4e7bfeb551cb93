use crate::{
    agents::{AgentSpec, Agents},
    executors::DEFAULT_SHUTDOWN_GRACE,
    problems::{ProblemIdError, ProblemSelection},
};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("Config is not valid")]
    Parse(#[from] serde_yaml::Error),
    #[error("Sweep id {sweep_id} is out of range for {agent}, which has {size} configs")]
    InvalidSweepId {
        agent: Agents,
        sweep_id: usize,
        size: usize,
    },
    #[error("Failed to serialize agent config")]
    AgentConfig(#[from] serde_json::Error),
    #[error("Invalid problem selection")]
    InvalidProblem(#[from] ProblemIdError),
    #[error("File {0:?} not found")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[source] Error),
    #[error("Config failed the preflight checks")]
    FailedPreflight,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TestbedConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    // agent under test, resolved against the agent factories
    pub agent: AgentConfig,
    // external process doing the actual training and evaluation
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub problems: ProblemSelection,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    // number of worker processes, defaults to the number of logical cpus
    pub processes: Option<usize>,
    pub shutdown_grace_ms: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub name: Agents,
    // entry of the agent sweep, the default config is used if unset
    pub sweep_id: Option<usize>,
    // override for the number of training batches of the default config
    pub num_batches: Option<u32>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TrainerConfig {
    pub exec: PathBuf,
    #[serde(default)]
    pub params: Vec<String>,
    // in seconds
    pub timeout: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ResultsConfig {
    #[serde(default = "default_results_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub overwrite: bool,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            dir: default_results_dir(),
            overwrite: false,
        }
    }
}

impl ExecutorConfig {
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE)
    }
}

impl AgentConfig {
    pub fn resolve(&self) -> Result<AgentSpec, ConfigErrors> {
        self.name.resolve(self.sweep_id, self.num_batches)
    }
}

impl TestbedConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigErrors::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Check the whole config at once and log every problem found, returns true if the
    /// config contains an error.
    pub fn preflight_checks(&self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if self.executor.processes == Some(0) {
            error!("executor.processes must be at least 1, leave it unset to use all cpus");
            contains_error = true;
        }

        match check_executable(&self.trainer.exec) {
            Ok(true) => {}
            Ok(false) => {
                error!(
                    "trainer.exec {} is not executable",
                    self.trainer.exec.to_string_lossy()
                );
                contains_error = true;
            }
            Err(e) => {
                error!(
                    "Failed to determine if trainer.exec ({}) is an executable: {e}",
                    self.trainer.exec.to_string_lossy()
                );
                contains_error = true;
            }
        }

        if self.trainer.timeout == 0 {
            error!("trainer.timeout cannot be 0, a trainer would never get to run");
            contains_error = true;
        }

        if let Err(e) = self.agent.resolve() {
            error!("agent is not valid: {e}");
            contains_error = true;
        }

        if self.agent.sweep_id.is_some() && self.agent.num_batches.is_some() {
            warn!("agent.num_batches only applies to the default config and is ignored for sweep entries");
        }

        if self.problems.is_empty() {
            warn!("No problems selected in the config, they have to be passed on the command line");
        } else if let Err(e) = self.problems.expand() {
            error!("problems are not valid: {e}");
            contains_error = true;
        }

        contains_error
    }
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("/tmp/neural_testbed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const CONFIG: &str = "
executor:
  processes: 4
agent:
  name: vanilla_ensemble
  num_batches: 10
trainer:
  exec: /bin/sh
  params: [train.sh]
  timeout: 600
problems:
  ids: [classification_2d/0]
  sweeps:
    regression: 2
";

    #[test]
    fn parses_and_passes_preflight() {
        let config: TestbedConfig = serde_yaml::from_str(CONFIG).unwrap();

        assert_eq!(config.executor.processes, Some(4));
        assert_eq!(config.executor.shutdown_grace(), DEFAULT_SHUTDOWN_GRACE);
        assert_eq!(config.results.dir, PathBuf::from("/tmp/neural_testbed"));
        assert!(!config.results.overwrite);
        assert_eq!(config.problems.expand().unwrap().len(), 3);
        assert!(!config.preflight_checks());
    }

    #[test]
    fn rejects_unknown_fields_and_agents() {
        let unknown_field = CONFIG.replace("processes: 4", "threads: 4");
        assert!(serde_yaml::from_str::<TestbedConfig>(&unknown_field).is_err());

        let unknown_agent = CONFIG.replace("vanilla_ensemble", "dropout");
        assert!(serde_yaml::from_str::<TestbedConfig>(&unknown_agent).is_err());
    }

    #[test]
    fn preflight_catches_invalid_values() {
        let mut config: TestbedConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.executor.processes = Some(0);
        assert!(config.preflight_checks());

        let mut config: TestbedConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.trainer.timeout = 0;
        assert!(config.preflight_checks());

        let mut config: TestbedConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.agent.sweep_id = Some(19);
        assert!(config.preflight_checks());

        let mut config: TestbedConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.problems.datasets.push("imagenet".to_string());
        assert!(config.preflight_checks());

        let mut config: TestbedConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.trainer.exec = PathBuf::from("/nonexistent/trainer");
        assert!(config.preflight_checks());
    }

    #[test]
    fn executable_bit_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("trainer.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();

        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!check_executable(&script).unwrap());

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(check_executable(&script).unwrap());

        assert!(matches!(
            check_executable(dir.path()),
            Err(ConfigErrors::FileNotFound(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let result = TestbedConfig::load(Path::new("/nonexistent/testbed.yaml"));

        assert!(matches!(result, Err(ConfigErrors::Io { .. })));
    }
}
