use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{PeermatchError, Result};
use crate::index::{
    IndexDescription, IndexEntry, IndexHandle, IndexSpec, QueryMatch, QueryRequest, VectorIndex,
};
use crate::search::top_k_by_cosine;

#[derive(Default)]
struct State {
    indexes: HashMap<String, StoredIndex>,
    upsert_calls: Vec<usize>,
    delete_calls: Vec<usize>,
    queries: usize,
}

struct StoredIndex {
    description: IndexDescription,
    entries: BTreeMap<String, IndexEntry>,
}

/// In-process [`VectorIndex`] used for dry runs and tests.
///
/// Indexes are ready as soon as they are created. Query scores are cosine
/// similarity regardless of the declared metric.
#[derive(Default)]
pub struct MemoryIndex {
    state: Mutex<State>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn not_found(name: &str) -> PeermatchError {
        PeermatchError::IndexApi {
            status: 404,
            message: format!("index '{}' not found", name),
        }
    }

    /// Entries of an index, ordered by id
    pub fn entries(&self, name: &str) -> Vec<IndexEntry> {
        self.state()
            .indexes
            .get(name)
            .map(|idx| idx.entries.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Size of every upsert call received so far, in arrival order
    pub fn upsert_calls(&self) -> Vec<usize> {
        self.state().upsert_calls.clone()
    }

    /// Number of ids in every delete call received so far
    pub fn delete_calls(&self) -> Vec<usize> {
        self.state().delete_calls.clone()
    }

    pub fn query_count(&self) -> usize {
        self.state().queries
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn list_indexes(&self) -> Result<Vec<IndexDescription>> {
        let mut list: Vec<IndexDescription> = self
            .state()
            .indexes
            .values()
            .map(|idx| idx.description.clone())
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<IndexDescription> {
        let mut state = self.state();
        if state.indexes.contains_key(&spec.name) {
            return Err(PeermatchError::IndexApi {
                status: 409,
                message: format!("index '{}' already exists", spec.name),
            });
        }
        let description = IndexDescription {
            name: spec.name.clone(),
            dimension: spec.dimension,
            metric: spec.metric,
            host: format!("{}.memory.local", spec.name),
            ready: true,
        };
        state.indexes.insert(
            spec.name.clone(),
            StoredIndex {
                description: description.clone(),
                entries: BTreeMap::new(),
            },
        );
        Ok(description)
    }

    async fn describe_index(&self, name: &str) -> Result<IndexDescription> {
        self.state()
            .indexes
            .get(name)
            .map(|idx| idx.description.clone())
            .ok_or_else(|| Self::not_found(name))
    }

    async fn upsert(&self, handle: &IndexHandle, entries: &[IndexEntry]) -> Result<usize> {
        let mut state = self.state();
        state.upsert_calls.push(entries.len());
        let index = state
            .indexes
            .get_mut(&handle.name)
            .ok_or_else(|| Self::not_found(&handle.name))?;

        for entry in entries {
            if entry.values.len() != index.description.dimension {
                return Err(PeermatchError::IndexApi {
                    status: 400,
                    message: format!(
                        "vector {} has dimension {}, index expects {}",
                        entry.id,
                        entry.values.len(),
                        index.description.dimension
                    ),
                });
            }
        }
        for entry in entries {
            index.entries.insert(entry.id.clone(), entry.clone());
        }
        Ok(entries.len())
    }

    async fn query(&self, handle: &IndexHandle, request: &QueryRequest) -> Result<Vec<QueryMatch>> {
        let mut state = self.state();
        state.queries += 1;
        let index = state
            .indexes
            .get(&handle.name)
            .ok_or_else(|| Self::not_found(&handle.name))?;
        if request.vector.len() != index.description.dimension {
            return Err(PeermatchError::IndexApi {
                status: 400,
                message: format!(
                    "query vector has dimension {}, index expects {}",
                    request.vector.len(),
                    index.description.dimension
                ),
            });
        }

        let candidates = index
            .entries
            .values()
            .filter(|e| request.filter.as_ref().map_or(true, |f| f.matches(&e.metadata)))
            .map(|e| (e.id.as_str(), e.values.as_slice()));
        let matches = top_k_by_cosine(&request.vector, candidates, request.top_k)
            .into_iter()
            .map(|(id, score)| QueryMatch {
                id: id.to_string(),
                score,
                metadata: if request.include_metadata {
                    index.entries.get(id).map(|e| e.metadata.clone())
                } else {
                    None
                },
            })
            .collect();
        Ok(matches)
    }

    async fn list_ids(&self, handle: &IndexHandle) -> Result<Vec<String>> {
        let state = self.state();
        let index = state
            .indexes
            .get(&handle.name)
            .ok_or_else(|| Self::not_found(&handle.name))?;
        Ok(index.entries.keys().cloned().collect())
    }

    async fn delete(&self, handle: &IndexHandle, ids: &[String]) -> Result<()> {
        let mut state = self.state();
        state.delete_calls.push(ids.len());
        let index = state
            .indexes
            .get_mut(&handle.name)
            .ok_or_else(|| Self::not_found(&handle.name))?;
        for id in ids {
            index.entries.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::PersonStatus;
    use crate::index::{IndexMetadata, IndexMetric, MetadataFilter};

    fn spec() -> IndexSpec {
        IndexSpec {
            name: "people".to_string(),
            dimension: 2,
            metric: IndexMetric::Cosine,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    fn handle() -> IndexHandle {
        IndexHandle {
            name: "people".to_string(),
            host: "people.memory.local".to_string(),
            namespace: None,
        }
    }

    fn entry(id: &str, values: [f32; 2], status: PersonStatus) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            values: values.to_vec(),
            metadata: IndexMetadata {
                status,
                scholarship_id: None,
            },
        }
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let index = MemoryIndex::new();
        index.create_index(&spec()).await.unwrap();
        let err = index.create_index(&spec()).await.unwrap_err();
        assert!(matches!(err, PeermatchError::IndexApi { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let index = MemoryIndex::new();
        index.create_index(&spec()).await.unwrap();
        index
            .upsert(&handle(), &[entry("a", [1.0, 0.0], PersonStatus::User)])
            .await
            .unwrap();
        index
            .upsert(&handle(), &[entry("a", [0.0, 1.0], PersonStatus::Alumni)])
            .await
            .unwrap();
        let entries = index.entries("people");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].values, vec![0.0, 1.0]);
        assert_eq!(index.upsert_calls(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_filter_applies_before_top_k() {
        let index = MemoryIndex::new();
        index.create_index(&spec()).await.unwrap();
        index
            .upsert(
                &handle(),
                &[
                    entry("alum1", [1.0, 0.0], PersonStatus::Alumni),
                    entry("alum2", [1.0, 0.01], PersonStatus::Alumni),
                    entry("user1", [0.5, 0.5], PersonStatus::User),
                    entry("user2", [0.0, 1.0], PersonStatus::User),
                ],
            )
            .await
            .unwrap();

        let matches = index
            .query(
                &handle(),
                &QueryRequest {
                    vector: vec![1.0, 0.0],
                    top_k: 2,
                    filter: Some(MetadataFilter::StatusEq(PersonStatus::User)),
                    include_metadata: false,
                },
            )
            .await
            .unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["user1", "user2"]);
        assert!(matches.iter().all(|m| m.metadata.is_none()));
    }

    #[tokio::test]
    async fn test_list_and_delete_ids() {
        let index = MemoryIndex::new();
        index.create_index(&spec()).await.unwrap();
        index
            .upsert(
                &handle(),
                &[
                    entry("b", [1.0, 0.0], PersonStatus::User),
                    entry("a", [0.0, 1.0], PersonStatus::User),
                ],
            )
            .await
            .unwrap();
        assert_eq!(index.list_ids(&handle()).await.unwrap(), vec!["a", "b"]);

        index
            .delete(&handle(), &["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(index.list_ids(&handle()).await.unwrap(), vec!["b"]);
        assert_eq!(index.delete_calls(), vec![2]);
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected() {
        let index = MemoryIndex::new();
        index.create_index(&spec()).await.unwrap();
        let mut bad = entry("a", [1.0, 0.0], PersonStatus::User);
        bad.values.push(0.0);
        let err = index.upsert(&handle(), &[bad]).await.unwrap_err();
        assert!(matches!(err, PeermatchError::IndexApi { status: 400, .. }));
        assert!(index.entries("people").is_empty());
    }
}
