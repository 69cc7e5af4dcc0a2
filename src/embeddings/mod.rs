//! node2vec training and embedding extraction.

pub mod extract;
mod skipgram;
mod trainer;
mod walks;

pub use extract::{
    classify, extract_embeddings, records_from_rows, ExtractionReport, PersonEmbeddingRecord, PersonStatus,
};
pub use trainer::{train_person_embeddings, TrainingParams};
