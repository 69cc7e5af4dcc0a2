//! Similarity search over person embeddings.

mod similar;
mod vector;

pub use similar::{Recommendation, SimilarPerson, SimilarityService, MAX_TOP_K};
pub use vector::{cosine_similarity, top_k_by_cosine};
