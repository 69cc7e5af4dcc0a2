//! Vector similarity index: wire types, the [`VectorIndex`] contract, and
//! batched publishing of person embeddings.

mod memory;
mod pinecone;
mod sync;

pub use memory::MemoryIndex;
pub use pinecone::PineconeClient;
pub use sync::{IndexSync, SyncReport, SyncSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::embeddings::{PersonEmbeddingRecord, PersonStatus};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMetric {
    Cosine,
    Euclidean,
    Dotproduct,
}

impl IndexMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMetric::Cosine => "cosine",
            IndexMetric::Euclidean => "euclidean",
            IndexMetric::Dotproduct => "dotproduct",
        }
    }
}

/// Parameters for creating a serverless index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: IndexMetric,
    pub cloud: String,
    pub region: String,
}

/// An index as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescription {
    pub name: String,
    pub dimension: usize,
    pub metric: IndexMetric,
    /// Data-plane host, empty while the index is still initializing
    pub host: String,
    pub ready: bool,
}

/// Where data-plane calls go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHandle {
    pub name: String,
    pub host: String,
    pub namespace: Option<String>,
}

/// Metadata stored with each vector. `scholarship_id` is omitted, not null,
/// for non-alumni.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub status: PersonStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scholarship_id: Option<String>,
}

impl IndexMetadata {
    pub fn for_record(record: &PersonEmbeddingRecord) -> Self {
        let scholarship_id = match record.status {
            PersonStatus::Alumni => record.scholarship_id.clone(),
            PersonStatus::User => None,
        };
        Self {
            status: record.status,
            scholarship_id,
        }
    }
}

/// One vector keyed by email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: IndexMetadata,
}

impl IndexEntry {
    pub fn from_record(record: &PersonEmbeddingRecord) -> Self {
        Self {
            id: record.email.clone(),
            values: record.vector.clone(),
            metadata: IndexMetadata::for_record(record),
        }
    }
}

/// Server-side metadata filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFilter {
    StatusEq(PersonStatus),
}

impl MetadataFilter {
    /// Pinecone filter expression
    pub fn to_json(&self) -> Value {
        match self {
            MetadataFilter::StatusEq(status) => json!({ "status": { "$eq": status.as_str() } }),
        }
    }

    pub fn matches(&self, metadata: &IndexMetadata) -> bool {
        match self {
            MetadataFilter::StatusEq(status) => metadata.status == *status,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub filter: Option<MetadataFilter>,
    pub include_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IndexMetadata>,
}

/// Control- and data-plane operations of a similarity index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn list_indexes(&self) -> Result<Vec<IndexDescription>>;

    async fn create_index(&self, spec: &IndexSpec) -> Result<IndexDescription>;

    async fn describe_index(&self, name: &str) -> Result<IndexDescription>;

    /// Overwrite entries by id. Returns the number of vectors upserted.
    async fn upsert(&self, handle: &IndexHandle, entries: &[IndexEntry]) -> Result<usize>;

    /// Nearest neighbors, highest score first, with the filter applied before ranking.
    async fn query(&self, handle: &IndexHandle, request: &QueryRequest) -> Result<Vec<QueryMatch>>;
    /// Every id stored in the handle's namespace.
    async fn list_ids(&self, handle: &IndexHandle) -> Result<Vec<String>>;
    /// Remove entries by id. Unknown ids are ignored.
    async fn delete(&self, handle: &IndexHandle, ids: &[String]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(email: &str, status: PersonStatus, scholarship: Option<&str>) -> PersonEmbeddingRecord {
        PersonEmbeddingRecord {
            email: email.to_string(),
            vector: vec![0.1, 0.2],
            status,
            scholarship_id: scholarship.map(str::to_string),
        }
    }

    #[test]
    fn test_alumni_metadata_carries_scholarship() {
        let entry = IndexEntry::from_record(&record("a@x.com", PersonStatus::Alumni, Some("Fund1")));
        assert_eq!(entry.id, "a@x.com");
        assert_eq!(
            serde_json::to_value(&entry.metadata).unwrap(),
            json!({"status": "alumni", "scholarship_id": "Fund1"})
        );
    }

    #[test]
    fn test_user_metadata_has_no_scholarship_key() {
        let entry = IndexEntry::from_record(&record("b@x.com", PersonStatus::User, None));
        assert_eq!(serde_json::to_value(&entry.metadata).unwrap(), json!({"status": "user"}));
    }

    #[test]
    fn test_user_never_carries_scholarship_id() {
        let metadata = IndexMetadata::for_record(&record("c@x.com", PersonStatus::User, Some("Stray")));
        assert!(metadata.scholarship_id.is_none());
    }

    #[test]
    fn test_alumni_without_named_scholarship() {
        let metadata = IndexMetadata::for_record(&record("d@x.com", PersonStatus::Alumni, None));
        assert_eq!(serde_json::to_value(&metadata).unwrap(), json!({"status": "alumni"}));
    }

    #[test]
    fn test_status_filter() {
        let filter = MetadataFilter::StatusEq(PersonStatus::User);
        assert_eq!(filter.to_json(), json!({"status": {"$eq": "user"}}));
        assert!(filter.matches(&IndexMetadata {
            status: PersonStatus::User,
            scholarship_id: None
        }));
        assert!(!filter.matches(&IndexMetadata {
            status: PersonStatus::Alumni,
            scholarship_id: Some("Fund1".to_string())
        }));
    }
}
