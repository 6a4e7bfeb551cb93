use serde::{Deserialize, Serialize};

/// a single unit handed to a worker process, encoded as one json document per line
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Request<I> {
    pub seq: usize,
    pub input: I,
}

/// result of running one unit inside a worker
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub enum Outcome<O> {
    Ok(O),
    Err(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Response<O> {
    pub seq: usize,
    pub outcome: Outcome<O>,
}
