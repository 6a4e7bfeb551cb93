use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Structured,
    Image,
    Regression,
}

impl DatasetKind {
    pub fn is_classification(&self) -> bool {
        !matches!(self, Self::Regression)
    }
}

/// Shape of a real dataset as seen by an agent
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatasetInfo {
    pub kind: DatasetKind,
    // 1 for regression targets
    pub num_classes: usize,
    pub input_dim: usize,
    pub num_train: usize,
    pub num_test: usize,
    // part of the first release of the benchmark
    pub original: bool,
}

/// One evaluation setting of a real dataset
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatasetSetting {
    pub dataset: &'static str,
    // number of jointly evaluated test points
    pub tau: usize,
}

/// tau values real classification data is evaluated at, regression only uses tau 1
pub const CLASSIFICATION_TAUS: [usize; 2] = [1, 10];

const fn info(
    kind: DatasetKind,
    num_classes: usize,
    input_dim: usize,
    num_train: usize,
    num_test: usize,
    original: bool,
) -> DatasetInfo {
    DatasetInfo {
        kind,
        num_classes,
        input_dim,
        num_train,
        num_test,
        original,
    }
}

/// registry of real datasets, keyed by the name used in `real_data/<name>` problem ids
pub static DATASETS: Lazy<BTreeMap<&'static str, DatasetInfo>> = Lazy::new(|| {
    use DatasetKind::*;

    BTreeMap::from([
        ("iris", info(Structured, 3, 4, 120, 30, true)),
        ("wine_quality", info(Structured, 11, 11, 3918, 980, true)),
        ("german_credit_numeric", info(Structured, 2, 24, 800, 200, true)),
        ("mnist", info(Image, 10, 784, 60000, 10000, true)),
        ("fashion_mnist", info(Image, 10, 784, 60000, 10000, true)),
        ("cifar10", info(Image, 10, 3072, 50000, 10000, true)),
        ("emnist/digits", info(Image, 10, 784, 240000, 40000, false)),
        ("cmaterdb", info(Image, 10, 3072, 5000, 1000, false)),
        ("boston_housing", info(Regression, 1, 13, 455, 51, false)),
        ("concrete_strength", info(Regression, 1, 8, 927, 103, false)),
        ("energy_efficiency", info(Regression, 1, 8, 691, 77, false)),
        ("kin8nm", info(Regression, 1, 8, 7373, 819, false)),
        ("naval_propulsion", info(Regression, 1, 16, 10741, 1193, false)),
        ("power_plant", info(Regression, 1, 4, 8611, 957, false)),
        ("protein_structure", info(Regression, 1, 9, 41157, 4573, false)),
        ("wine", info(Regression, 1, 11, 1439, 160, false)),
        ("yacht_hydrodynamics", info(Regression, 1, 6, 277, 31, false)),
    ])
});

pub fn get(name: &str) -> Option<&'static DatasetInfo> {
    DATASETS.get(name)
}

/// names of all datasets of `kind`, sorted
pub fn names(kind: DatasetKind) -> Vec<&'static str> {
    DATASETS
        .iter()
        .filter(|(_, info)| info.kind == kind)
        .map(|(name, _)| *name)
        .collect()
}

/// names of the datasets of `kind` that were part of the first release, sorted
pub fn original(kind: DatasetKind) -> Vec<&'static str> {
    DATASETS
        .iter()
        .filter(|(_, info)| info.kind == kind && info.original)
        .map(|(name, _)| *name)
        .collect()
}

/// every dataset with every tau it is evaluated at
pub fn settings() -> Vec<DatasetSetting> {
    DATASETS
        .iter()
        .flat_map(|(dataset, info)| {
            let taus: &[usize] = if info.kind.is_classification() {
                &CLASSIFICATION_TAUS
            } else {
                &[1]
            };

            taus.iter().map(move |tau| DatasetSetting {
                dataset: *dataset,
                tau: *tau,
            })
        })
        .collect()
}
