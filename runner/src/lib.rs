pub mod agents;
pub mod config;
pub mod datasets;
pub mod executors;
pub mod experiments;
pub mod ingest;
pub mod problems;
pub mod results;
