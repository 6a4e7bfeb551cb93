use super::PaperAgent;
use itertools::iproduct;
use serde::{Deserialize, Serialize};

/// Hyperparameters of the vanilla ensemble agent
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VanillaEnsembleConfig {
    // size of the ensemble
    pub num_ensemble: usize,
    pub l2_weight_decay: f64,
    // scale the weight decay with the prior
    pub adaptive_weight_scale: bool,
    pub hidden_sizes: Vec<usize>,
    // number of sgd steps
    pub num_batches: u32,
    pub seed: u64,
}

impl Default for VanillaEnsembleConfig {
    fn default() -> Self {
        Self {
            num_ensemble: 100,
            l2_weight_decay: 1.,
            adaptive_weight_scale: true,
            hidden_sizes: vec![50, 50],
            num_batches: 1000,
            seed: 0,
        }
    }
}

pub fn vanilla_sweep() -> Vec<VanillaEnsembleConfig> {
    [1, 3, 10, 30, 100]
        .into_iter()
        .map(|num_ensemble| VanillaEnsembleConfig {
            num_ensemble,
            ..Default::default()
        })
        .collect()
}

pub fn weight_sweep() -> Vec<VanillaEnsembleConfig> {
    iproduct!(
        [true, false],
        [1e-4, 1e-3, 1e-2, 1e-1, 1., 10., 100.]
    )
    .map(
        |(adaptive_weight_scale, l2_weight_decay)| VanillaEnsembleConfig {
            num_ensemble: 30,
            l2_weight_decay,
            adaptive_weight_scale,
            ..Default::default()
        },
    )
    .collect()
}

pub fn combined_sweep() -> Vec<VanillaEnsembleConfig> {
    let mut sweep = vanilla_sweep();
    sweep.extend(weight_sweep());

    sweep
}

pub fn paper_agent() -> PaperAgent<VanillaEnsembleConfig> {
    PaperAgent {
        default: VanillaEnsembleConfig::default(),
        sweep: combined_sweep,
    }
}
