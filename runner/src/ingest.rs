use serde::Deserialize;
use serde_yaml::Value;
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error;
use tracing::error;

/// one row of metrics reported by a trainer, metric name -> value
pub type Metrics = BTreeMap<String, Value>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Trainer did not report any metrics")]
    NoMetrics,
    #[error("Failed to deserialize trainer output")]
    Deserialize(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone)]
/// container for information extracted from running a trainer
pub struct RunOutput {
    pub runtime: Duration,
    pub stdout: String,
    pub stderr: String,
    pub status: Option<i32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Records {
    Many(Vec<Metrics>),
    One(Metrics),
}

/// Read the metrics a trainer printed on stdout.
///
/// Accepts a yaml (or json) mapping for a single row or a sequence of mappings.
pub fn parse_records(stdout: &str) -> Result<Vec<Metrics>, IngestError> {
    if stdout.trim().is_empty() {
        return Err(IngestError::NoMetrics);
    }

    let records = match serde_yaml::from_str::<Records>(stdout) {
        Ok(Records::Many(records)) => records,
        Ok(Records::One(record)) => vec![record],
        Err(error) => {
            error!(error = ?error, "Failed to deserialize metrics from trainer");

            return Err(error.into());
        }
    };

    if records.is_empty() {
        Err(IngestError::NoMetrics)
    } else {
        Ok(records)
    }
}

/// flat textual form of a metric value for the csv log
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(value) => value.to_string(),
        Value::Number(value) => value.to_string(),
        Value::String(value) => value.clone(),
        other => serde_yaml::to_string(other)
            .map(|rendered| rendered.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_mapping() {
        let records = parse_records("kl_estimate: 0.25\nseed: 3\n").unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(render(&records[0]["kl_estimate"]), "0.25");
        assert_eq!(render(&records[0]["seed"]), "3");
    }

    #[test]
    fn sequence_of_mappings_and_json() {
        let records =
            parse_records(r#"[{"kl_estimate": 0.5, "tau": 1}, {"kl_estimate": 0.75, "tau": 10}]"#)
                .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(render(&records[1]["tau"]), "10");
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(matches!(parse_records("  \n"), Err(IngestError::NoMetrics)));
        assert!(matches!(parse_records("[]"), Err(IngestError::NoMetrics)));
        assert!(matches!(
            parse_records("just some log line"),
            Err(IngestError::Deserialize(_))
        ));
    }

    #[test]
    fn renders_nested_values() {
        let value: Value = serde_yaml::from_str("[1, 2]").unwrap();

        assert_eq!(render(&Value::Null), "");
        assert_eq!(render(&Value::Bool(true)), "true");
        assert_eq!(render(&value), "- 1\n- 2");
    }
}
