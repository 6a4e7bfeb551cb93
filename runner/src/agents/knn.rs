use super::PaperAgent;
use itertools::iproduct;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Weighting {
    Uniform,
    Distance,
}

/// Hyperparameters of the k-nearest neighbours baseline
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct KnnConfig {
    pub num_neighbors: usize,
    pub weighting: Weighting,
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            num_neighbors: 3,
            weighting: Weighting::Uniform,
        }
    }
}

pub fn knn_sweep() -> Vec<KnnConfig> {
    iproduct!(
        [1, 5, 10, 30, 50, 100],
        [Weighting::Uniform, Weighting::Distance]
    )
    .map(|(num_neighbors, weighting)| KnnConfig {
        num_neighbors,
        weighting,
    })
    .collect()
}

pub fn paper_agent() -> PaperAgent<KnnConfig> {
    PaperAgent {
        default: KnnConfig::default(),
        sweep: knn_sweep,
    }
}
