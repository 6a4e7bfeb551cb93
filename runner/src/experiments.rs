pub mod probe;
pub mod trainer;

use serde::{de::DeserializeOwned, Serialize};
use std::{
    ffi::OsString,
    fmt::{Debug, Display},
};

/// A run function that can be executed in a separate worker process.
///
/// Workers rebuild the experiment from `NAME` and `worker_args` alone, so an experiment
/// must not depend on state that only exists in the dispatching process.
pub trait Experiment {
    /// name of the experiment as understood by the `worker` subcommand
    const NAME: &'static str;

    type Input: Serialize + DeserializeOwned + Debug + Display;
    type Output: Serialize + DeserializeOwned + Display;
    type Error: Display;

    /// arguments the `worker` subcommand needs to rebuild this experiment
    fn worker_args(&self) -> Vec<OsString> {
        Vec::new()
    }

    fn run(&self, input: Self::Input) -> Result<Self::Output, Self::Error>;
}
