//! Second-order biased random walks over a [`Projection`].

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::graph::Projection;

/// Walk shape and node2vec bias.
#[derive(Debug, Clone, Copy)]
pub struct WalkConfig {
    pub walk_length: usize,
    pub walks_per_node: usize,
    /// `p`: likelihood of returning to the previous node is scaled by `1/p`
    pub return_factor: f64,
    /// `q`: likelihood of moving away from the previous node is scaled by `1/q`
    pub in_out_factor: f64,
}

impl WalkConfig {
    fn is_unbiased(&self) -> bool {
        self.return_factor == 1.0 && self.in_out_factor == 1.0
    }
}

/// Generate `walks_per_node` walks from every node with outgoing edges.
///
/// Each round visits the start nodes in a freshly shuffled order. A walk
/// stops early if it reaches a node without outgoing edges.
pub fn generate_walks(graph: &Projection, config: &WalkConfig, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut starts: Vec<usize> = (0..graph.node_count())
        .filter(|&n| graph.out_degree(n) > 0)
        .collect();
    let mut walks = Vec::with_capacity(starts.len() * config.walks_per_node);
    let mut scratch = Vec::new();

    for _ in 0..config.walks_per_node {
        starts.shuffle(rng);
        for &start in &starts {
            walks.push(walk_from(graph, start, config, rng, &mut scratch));
        }
    }
    walks
}

fn walk_from(
    graph: &Projection,
    start: usize,
    config: &WalkConfig,
    rng: &mut StdRng,
    scratch: &mut Vec<f64>,
) -> Vec<usize> {
    let mut walk = Vec::with_capacity(config.walk_length);
    walk.push(start);

    while walk.len() < config.walk_length {
        let current = walk[walk.len() - 1];
        let previous = if walk.len() > 1 { Some(walk[walk.len() - 2]) } else { None };
        let next = match previous {
            Some(prev) if !config.is_unbiased() => biased_step(graph, prev, current, config, rng, scratch),
            _ => weighted_step(graph, current, rng),
        };
        match next {
            Some(n) => walk.push(n),
            None => break,
        }
    }
    walk
}

/// First-order step: pick a neighbor proportionally to edge weight.
fn weighted_step(graph: &Projection, current: usize, rng: &mut StdRng) -> Option<usize> {
    let neighbors = graph.neighbors(current);
    let weights = graph.neighbor_weights(current);
    sample(neighbors, weights, rng)
}

/// node2vec step: edge weight scaled by the return / in-out bias relative to `previous`.
fn biased_step(
    graph: &Projection,
    previous: usize,
    current: usize,
    config: &WalkConfig,
    rng: &mut StdRng,
    scratch: &mut Vec<f64>,
) -> Option<usize> {
    let neighbors = graph.neighbors(current);
    let weights = graph.neighbor_weights(current);

    scratch.clear();
    scratch.extend(neighbors.iter().zip(weights).map(|(&next, &w)| {
        if next == previous {
            w / config.return_factor
        } else if graph.has_edge(previous, next) {
            w
        } else {
            w / config.in_out_factor
        }
    }));
    sample(neighbors, scratch, rng)
}

fn sample(candidates: &[usize], weights: &[f64], rng: &mut StdRng) -> Option<usize> {
    let total: f64 = weights.iter().sum();
    if candidates.is_empty() || !(total > 0.0) {
        return None;
    }
    let mut r = rng.gen::<f64>() * total;
    for (&candidate, &w) in candidates.iter().zip(weights) {
        if r < w {
            return Some(candidate);
        }
        r -= w;
    }
    candidates.last().copied()
}
