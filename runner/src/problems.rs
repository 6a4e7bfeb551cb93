use crate::datasets::{self, DatasetInfo};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    str::FromStr,
};
use thiserror::Error;

/// sweep whose problems are keyed by a dataset name instead of an index
pub const REAL_DATA_SWEEP: &str = "real_data";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProblemIdError {
    #[error("Problem id '{0}' must have the form <sweep>/<key>")]
    MissingSeparator(String),
    #[error("Problem id '{0}' has an empty sweep or key")]
    Empty(String),
    #[error("Problem id '{0}' must end in a problem index")]
    InvalidIndex(String),
    #[error("Problem id '{0}' names an unknown dataset")]
    UnknownDataset(String),
}

/// Identifier of one benchmark problem, `<sweep>/<key>` split at the first `/`
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ProblemId {
    raw: String,
    split: usize,
}

impl ProblemId {
    pub fn sweep(&self) -> &str {
        &self.raw[..self.split]
    }

    pub fn key(&self) -> &str {
        &self.raw[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn dataset(&self) -> Option<&'static DatasetInfo> {
        if self.sweep() == REAL_DATA_SWEEP {
            datasets::get(self.key())
        } else {
            None
        }
    }

    /// id usable as part of a file name
    pub fn csv_stem(&self) -> String {
        self.raw.replace('/', "_")
    }
}

impl FromStr for ProblemId {
    type Err = ProblemIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (sweep, key) = value
            .split_once('/')
            .ok_or_else(|| ProblemIdError::MissingSeparator(value.to_string()))?;

        if sweep.is_empty() || key.is_empty() {
            return Err(ProblemIdError::Empty(value.to_string()));
        }

        if sweep == REAL_DATA_SWEEP {
            if datasets::get(key).is_none() {
                return Err(ProblemIdError::UnknownDataset(value.to_string()));
            }
        } else if key.parse::<usize>().is_err() {
            return Err(ProblemIdError::InvalidIndex(value.to_string()));
        }

        Ok(Self {
            raw: value.to_string(),
            split: sweep.len(),
        })
    }
}

impl TryFrom<String> for ProblemId {
    type Error = ProblemIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProblemId> for String {
    fn from(value: ProblemId) -> Self {
        value.raw
    }
}

impl Display for ProblemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Problems selected in the config
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ProblemSelection {
    // explicit problem ids
    #[serde(default)]
    pub ids: Vec<String>,
    // sweep name -> number of problems, expanded to <sweep>/0..n
    #[serde(default)]
    pub sweeps: BTreeMap<String, usize>,
    // real datasets, expanded to real_data/<dataset>
    #[serde(default)]
    pub datasets: Vec<String>,
}

impl ProblemSelection {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.datasets.is_empty() && self.sweeps.values().all(|n| *n == 0)
    }

    /// all selected problems without duplicates, in the order they were first named
    pub fn expand(&self) -> Result<Vec<ProblemId>, ProblemIdError> {
        let swept = self
            .sweeps
            .iter()
            .flat_map(|(sweep, count)| (0..*count).map(move |index| format!("{sweep}/{index}")));
        let real = self
            .datasets
            .iter()
            .map(|dataset| format!("{REAL_DATA_SWEEP}/{dataset}"));

        self.ids
            .iter()
            .cloned()
            .chain(swept)
            .chain(real)
            .unique()
            .map(|id| id.parse::<ProblemId>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_indexed_and_real_data_ids() {
        let id: ProblemId = "classification_2d/12".parse().unwrap();
        assert_eq!(id.sweep(), "classification_2d");
        assert_eq!(id.key(), "12");
        assert!(id.dataset().is_none());
        assert_eq!(id.csv_stem(), "classification_2d_12");

        let id: ProblemId = "real_data/emnist/digits".parse().unwrap();
        assert_eq!(id.sweep(), REAL_DATA_SWEEP);
        assert_eq!(id.key(), "emnist/digits");
        assert_eq!(id.dataset().map(|info| info.num_classes), Some(10));
        assert_eq!(id.csv_stem(), "real_data_emnist_digits");
        assert_eq!(id.to_string(), "real_data/emnist/digits");
    }

    #[test]
    fn rejects_malformed_ids() {
        assert_eq!(
            "classification".parse::<ProblemId>(),
            Err(ProblemIdError::MissingSeparator("classification".to_string()))
        );
        assert!(matches!("/3".parse::<ProblemId>(), Err(ProblemIdError::Empty(_))));
        assert!(matches!(
            "classification/".parse::<ProblemId>(),
            Err(ProblemIdError::Empty(_))
        ));
        assert!(matches!(
            "classification/x".parse::<ProblemId>(),
            Err(ProblemIdError::InvalidIndex(_))
        ));
        assert!(matches!(
            "real_data/imagenet".parse::<ProblemId>(),
            Err(ProblemIdError::UnknownDataset(_))
        ));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id: ProblemId = "regression/3".parse().unwrap();

        assert_eq!(serde_json::to_string(&id).unwrap(), "\"regression/3\"");
        assert_eq!(serde_json::from_str::<ProblemId>("\"regression/3\"").unwrap(), id);
        assert!(serde_json::from_str::<ProblemId>("\"regression\"").is_err());
    }

    #[test]
    fn expands_selection_without_duplicates() {
        let selection = ProblemSelection {
            ids: vec!["classification/1".to_string(), "real_data/iris".to_string()],
            sweeps: BTreeMap::from([("classification".to_string(), 3)]),
            datasets: vec!["iris".to_string(), "mnist".to_string()],
        };

        let expanded: Vec<String> = selection
            .expand()
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(
            expanded,
            vec![
                "classification/1",
                "real_data/iris",
                "classification/0",
                "classification/2",
                "real_data/mnist",
            ]
        );
        assert!(!selection.is_empty());
        assert!(ProblemSelection::default().is_empty());
    }
}
