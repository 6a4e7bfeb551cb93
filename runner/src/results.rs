use crate::{
    agents::AgentSpec,
    ingest::{render, Metrics},
    problems::ProblemId,
};
use itertools::Itertools;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("Results file {0:?} already exists, set results.overwrite to replace it")]
    Exists(PathBuf),
    #[error("Failed to access results file")]
    Io(#[from] io::Error),
    #[error("Failed to write csv results")]
    Csv(#[from] csv::Error),
}

/// columns written before the metrics of each row
pub const LEADING_COLUMNS: [&str; 3] = ["problem_id", "agent", "sweep_id"];

/// `<dir>/results_<problem id with / replaced by _>.csv`
pub fn results_path(dir: &Path, problem: &ProblemId) -> PathBuf {
    dir.join(format!("results_{}.csv", problem.csv_stem()))
}

/// CSV log of the metrics of one problem
#[derive(Debug)]
pub struct ResultsLogger {
    path: PathBuf,
    overwrite: bool,
}

impl ResultsLogger {
    /// Check that results for `problem` may be written, before any work is done for it.
    pub fn prepare(dir: &Path, problem: &ProblemId, overwrite: bool) -> Result<Self, ResultsError> {
        let path = results_path(dir, problem);

        if !overwrite && path.exists() {
            return Err(ResultsError::Exists(path));
        }

        Ok(Self { path, overwrite })
    }

    /// Write every record as one row, with the union of all metric names as columns.
    pub fn log(
        self,
        problem: &ProblemId,
        agent: &AgentSpec,
        records: &[Metrics],
    ) -> Result<PathBuf, ResultsError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let file = if self.overwrite {
            File::create(&self.path)?
        } else {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
                .map_err(|error| match error.kind() {
                    io::ErrorKind::AlreadyExists => ResultsError::Exists(self.path.clone()),
                    _ => error.into(),
                })?
        };

        let columns = records
            .iter()
            .flat_map(|record| record.keys())
            .sorted()
            .dedup()
            .collect_vec();
        let agent_name = agent.agent.to_string();
        let sweep_id = agent.sweep_id.map(|id| id.to_string()).unwrap_or_default();

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(
            LEADING_COLUMNS
                .iter()
                .copied()
                .chain(columns.iter().map(|column| column.as_str())),
        )?;

        for record in records {
            let values = columns
                .iter()
                .map(|column| record.get(*column).map(render).unwrap_or_default());

            writer.write_record(
                [problem.to_string(), agent_name.clone(), sweep_id.clone()]
                    .into_iter()
                    .chain(values),
            )?;
        }

        writer.flush()?;
        debug!(path = ?self.path, rows = records.len(), "Wrote results");

        Ok(self.path)
    }
}
