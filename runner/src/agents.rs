pub mod ensemble;
pub mod knn;

use crate::config::ConfigErrors;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// An agent as benchmarked in the paper: a default config and a hyperparameter sweep
#[derive(Clone, Debug)]
pub struct PaperAgent<C> {
    pub default: C,
    pub sweep: fn() -> Vec<C>,
}

/// All agents that can be selected by name
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Agents {
    #[value(name = "vanilla_ensemble")]
    VanillaEnsemble,
    #[value(name = "knn")]
    Knn,
}

/// A fully resolved agent configuration, handed to the trainer as is
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct AgentSpec {
    pub agent: Agents,
    pub sweep_id: Option<usize>,
    pub config: serde_json::Value,
}

/// default and indexed sweep of an agent, as printed by `testbed sweep`
#[derive(Serialize, Debug)]
pub struct AgentCatalog {
    pub agent: Agents,
    pub default: serde_json::Value,
    pub sweep: Vec<SweepEntry>,
}

#[derive(Serialize, Debug)]
pub struct SweepEntry {
    pub sweep_id: usize,
    pub config: serde_json::Value,
}

impl Display for Agents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VanillaEnsemble => write!(f, "vanilla_ensemble"),
            Self::Knn => write!(f, "knn"),
        }
    }
}

impl Agents {
    pub const ALL: [Agents; 2] = [Agents::VanillaEnsemble, Agents::Knn];

    /// Resolve the config to run.
    ///
    /// Without a sweep id the default config is used, with `num_batches` applied if the
    /// agent trains in batches. A sweep id selects that entry of the sweep unchanged.
    pub fn resolve(
        &self,
        sweep_id: Option<usize>,
        num_batches: Option<u32>,
    ) -> Result<AgentSpec, ConfigErrors> {
        match self {
            Self::VanillaEnsemble => select(*self, ensemble::paper_agent(), sweep_id, |config| {
                if let Some(num_batches) = num_batches {
                    config.num_batches = num_batches;
                }
            }),
            Self::Knn => select(*self, knn::paper_agent(), sweep_id, |_| {}),
        }
    }

    pub fn catalog(&self) -> Result<AgentCatalog, ConfigErrors> {
        match self {
            Self::VanillaEnsemble => catalog(*self, ensemble::paper_agent()),
            Self::Knn => catalog(*self, knn::paper_agent()),
        }
    }
}

fn select<C: Serialize>(
    agent: Agents,
    paper_agent: PaperAgent<C>,
    sweep_id: Option<usize>,
    override_default: impl FnOnce(&mut C),
) -> Result<AgentSpec, ConfigErrors> {
    let config = match sweep_id {
        None => {
            let mut config = paper_agent.default;
            override_default(&mut config);

            config
        }
        Some(id) => {
            let mut sweep = (paper_agent.sweep)();
            let size = sweep.len();

            if id >= size {
                return Err(ConfigErrors::InvalidSweepId {
                    agent,
                    sweep_id: id,
                    size,
                });
            }

            sweep.swap_remove(id)
        }
    };

    Ok(AgentSpec {
        agent,
        sweep_id,
        config: serde_json::to_value(config)?,
    })
}

fn catalog<C: Serialize>(
    agent: Agents,
    paper_agent: PaperAgent<C>,
) -> Result<AgentCatalog, ConfigErrors> {
    let sweep = (paper_agent.sweep)()
        .into_iter()
        .enumerate()
        .map(|(sweep_id, config)| {
            Ok(SweepEntry {
                sweep_id,
                config: serde_json::to_value(config)?,
            })
        })
        .collect::<Result<Vec<_>, ConfigErrors>>()?;

    Ok(AgentCatalog {
        agent,
        default: serde_json::to_value(paper_agent.default)?,
        sweep,
    })
}
