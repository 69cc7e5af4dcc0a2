pub mod config;
pub mod error;
pub mod graph;
pub mod embeddings;
pub mod index;
pub mod search;
pub mod cache;
pub mod pipeline;
pub mod setup;
pub mod server;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::Config;
pub use error::{PeermatchError, Result};
pub use pipeline::{Pipeline, PipelineReport, RunOptions};
pub use search::{Recommendation, SimilarPerson, SimilarityService};
