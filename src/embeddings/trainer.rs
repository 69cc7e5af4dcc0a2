use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::embeddings::skipgram::{SkipGram, SkipGramConfig};
use crate::embeddings::walks::{generate_walks, WalkConfig};
use crate::error::{PeermatchError, Result};
use crate::graph::Projection;

/// node2vec hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub dimension: usize,
    pub walk_length: usize,
    pub walks_per_node: usize,
    /// Training passes over the walk corpus
    pub iterations: usize,
    pub window_size: usize,
    pub negative_samples: usize,
    pub return_factor: f64,
    pub in_out_factor: f64,
    pub initial_learning_rate: f32,
    pub min_learning_rate: f32,
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            dimension: 128,
            walk_length: 80,
            walks_per_node: 10,
            iterations: 15,
            window_size: 10,
            negative_samples: 5,
            return_factor: 1.0,
            in_out_factor: 1.0,
            initial_learning_rate: 0.025,
            min_learning_rate: 0.0001,
            seed: 42,
        }
    }
}

impl TrainingParams {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(PeermatchError::Training(msg.to_string()));
        if self.dimension == 0 {
            return fail("dimension must be greater than 0");
        }
        if self.walk_length < 2 {
            return fail("walk_length must be at least 2");
        }
        if self.walks_per_node == 0 || self.iterations == 0 || self.window_size == 0 {
            return fail("walks_per_node, iterations and window_size must be greater than 0");
        }
        if !(self.return_factor > 0.0) || !(self.in_out_factor > 0.0) {
            return fail("return_factor and in_out_factor must be positive");
        }
        if !(self.initial_learning_rate > 0.0) || self.min_learning_rate > self.initial_learning_rate {
            return fail("learning rate must be positive and not below min_learning_rate");
        }
        Ok(())
    }

    /// Upper bound on skip-gram pair updates for a graph of `node_count`
    /// nodes. Each update touches `1 + negative_samples` vectors of
    /// `dimension` floats, so this is a proxy for training time.
    pub fn estimated_pair_updates(&self, node_count: usize) -> u64 {
        [
            node_count,
            self.walks_per_node,
            self.walk_length,
            2 * self.window_size,
            self.iterations,
        ]
        .iter()
        .fold(1u64, |acc, &n| acc.saturating_mul(n as u64))
    }

    fn walk_config(&self) -> WalkConfig {
        WalkConfig {
            walk_length: self.walk_length,
            walks_per_node: self.walks_per_node,
            return_factor: self.return_factor,
            in_out_factor: self.in_out_factor,
        }
    }

    fn skipgram_config(&self) -> SkipGramConfig {
        SkipGramConfig {
            dimension: self.dimension,
            window_size: self.window_size,
            negative_samples: self.negative_samples,
            iterations: self.iterations,
            initial_learning_rate: self.initial_learning_rate,
            min_learning_rate: self.min_learning_rate,
        }
    }
}

/// Train node2vec over the projection and return `(email, vector)` for every
/// projected person, sorted by email.
///
/// CPU-bound and single-threaded; async callers should run it on a blocking
/// thread. At the default parameters a graph of a few thousand nodes takes
/// minutes; see [`TrainingParams::estimated_pair_updates`].
pub fn train_person_embeddings(graph: &Projection, params: &TrainingParams) -> Result<Vec<(String, Vec<f32>)>> {
    params.validate()?;
    if graph.relationship_count() == 0 {
        return Err(PeermatchError::Training(format!(
            "projection '{}' has no relationships to walk",
            graph.name()
        )));
    }

    log::info!(
        "Training over {} nodes: up to {} skip-gram updates of dimension {} on one thread",
        graph.node_count(),
        params.estimated_pair_updates(graph.node_count()),
        params.dimension
    );
    let mut rng = StdRng::seed_from_u64(params.seed);
    let walks = generate_walks(graph, &params.walk_config(), &mut rng);
    log::debug!("Generated {} walks over {} nodes", walks.len(), graph.node_count());

    let mut model = SkipGram::new(graph.node_count(), params.dimension, &walks, &mut rng);
    model.train(&walks, &params.skipgram_config(), &mut rng);

    let mut vectors: Vec<(String, Vec<f32>)> = graph
        .persons()
        .map(|idx| (graph.node(idx).key.clone(), model.vector(idx).to_vec()))
        .collect();
    vectors.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(vectors)
}
