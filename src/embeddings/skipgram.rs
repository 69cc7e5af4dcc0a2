//! Skip-gram with negative sampling over a walk corpus.

use rand::rngs::StdRng;
use rand::Rng;

const MAX_EXP: f32 = 6.0;

/// Learning schedule and sampling settings.
#[derive(Debug, Clone, Copy)]
pub struct SkipGramConfig {
    pub dimension: usize,
    pub window_size: usize,
    pub negative_samples: usize,
    pub iterations: usize,
    pub initial_learning_rate: f32,
    pub min_learning_rate: f32,
}

/// Input (`syn0`) and output (`syn1`) weight matrices, row-major per node.
pub struct SkipGram {
    dimension: usize,
    syn0: Vec<f32>,
    syn1: Vec<f32>,
    /// Cumulative unigram^0.75 table for negative sampling
    noise: Vec<f64>,
}

impl SkipGram {
    /// Random input vectors, zero output vectors, noise table from walk frequencies.
    pub fn new(node_count: usize, dimension: usize, walks: &[Vec<usize>], rng: &mut StdRng) -> Self {
        let syn0 = (0..node_count * dimension)
            .map(|_| (rng.gen::<f32>() - 0.5) / dimension as f32)
            .collect();
        let syn1 = vec![0.0; node_count * dimension];

        let mut counts = vec![0u64; node_count];
        for walk in walks {
            for &node in walk {
                counts[node] += 1;
            }
        }
        let mut acc = 0.0;
        let noise = counts
            .iter()
            .map(|&c| {
                acc += (c as f64).powf(0.75);
                acc
            })
            .collect();

        Self {
            dimension,
            syn0,
            syn1,
            noise,
        }
    }

    /// Train over the corpus for `config.iterations` passes.
    pub fn train(&mut self, walks: &[Vec<usize>], config: &SkipGramConfig, rng: &mut StdRng) {
        let tokens: usize = walks.iter().map(|w| w.len()).sum();
        let total = (tokens * config.iterations).max(1) as f32;
        let lr_span = config.initial_learning_rate - config.min_learning_rate;
        let mut grad = vec![0.0f32; self.dimension];
        let mut processed = 0usize;

        for _ in 0..config.iterations {
            for walk in walks {
                for (i, &center) in walk.iter().enumerate() {
                    let progress = processed as f32 / total;
                    let lr = (config.initial_learning_rate - lr_span * progress).max(config.min_learning_rate);
                    processed += 1;

                    let lo = i.saturating_sub(config.window_size);
                    let hi = (i + config.window_size).min(walk.len() - 1);
                    for (j, &context) in walk.iter().enumerate().take(hi + 1).skip(lo) {
                        if j != i {
                            self.train_pair(center, context, lr, config.negative_samples, rng, &mut grad);
                        }
                    }
                }
            }
        }
    }

    fn train_pair(
        &mut self,
        input: usize,
        output: usize,
        lr: f32,
        negatives: usize,
        rng: &mut StdRng,
        grad: &mut [f32],
    ) {
        let dim = self.dimension;
        let l1 = input * dim;
        grad.iter_mut().for_each(|g| *g = 0.0);

        for d in 0..=negatives {
            let (target, label) = if d == 0 {
                (output, 1.0)
            } else {
                match self.sample_negative(rng) {
                    Some(t) if t != output => (t, 0.0),
                    _ => continue,
                }
            };
            let l2 = target * dim;
            let dot: f32 = self.syn0[l1..l1 + dim]
                .iter()
                .zip(&self.syn1[l2..l2 + dim])
                .map(|(a, b)| a * b)
                .sum();
            let g = (label - sigmoid(dot)) * lr;
            for k in 0..dim {
                grad[k] += g * self.syn1[l2 + k];
                self.syn1[l2 + k] += g * self.syn0[l1 + k];
            }
        }

        for (w, g) in self.syn0[l1..l1 + dim].iter_mut().zip(grad.iter()) {
            *w += g;
        }
    }

    fn sample_negative(&self, rng: &mut StdRng) -> Option<usize> {
        let total = *self.noise.last()?;
        if total <= 0.0 {
            return None;
        }
        let r = rng.gen::<f64>() * total;
        let idx = self.noise.partition_point(|&c| c <= r);
        Some(idx.min(self.noise.len() - 1))
    }

    /// Learned input vector of a node
    pub fn vector(&self, node: usize) -> &[f32] {
        &self.syn0[node * self.dimension..(node + 1) * self.dimension]
    }
}

fn sigmoid(x: f32) -> f32 {
    if x > MAX_EXP {
        1.0
    } else if x < -MAX_EXP {
        0.0
    } else {
        1.0 / (1.0 + (-x).exp())
    }
}
