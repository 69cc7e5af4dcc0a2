use serde::Serialize;
use std::sync::Arc;

use crate::cache::EmbeddingCache;
use crate::embeddings::PersonStatus;
use crate::error::{PeermatchError, Result};
use crate::graph::GraphStore;
use crate::index::{IndexHandle, MetadataFilter, QueryRequest, VectorIndex};

/// Largest `k` accepted. The index caps `topK` at 10000 and one extra
/// neighbor is requested for the self match.
pub const MAX_TOP_K: usize = 9_999;

/// A recommended person and their cosine similarity to the query person.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarPerson {
    pub email: String,
    pub score: f32,
}

/// Result of [`SimilarityService::recommend`]. On failure `matches` is empty and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub query: String,
    pub top_k: usize,
    pub matches: Vec<SimilarPerson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Recommendation {
    pub fn failed(query: &str, top_k: usize, error: &PeermatchError) -> Self {
        Self {
            query: query.to_string(),
            top_k,
            matches: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Finds the people most similar to a given person, restricted to users.
pub struct SimilarityService {
    store: Arc<dyn GraphStore>,
    index: Arc<dyn VectorIndex>,
    handle: IndexHandle,
    property: String,
    cache: Option<Arc<EmbeddingCache>>,
}

impl SimilarityService {
    pub fn new(store: Arc<dyn GraphStore>, index: Arc<dyn VectorIndex>, handle: IndexHandle, property: String) -> Self {
        Self {
            store,
            index,
            handle,
            property,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<EmbeddingCache>> {
        self.cache.as_ref()
    }

    /// Stored vector of `email`, from the cache when possible.
    async fn query_vector(&self, email: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.cache.as_ref().and_then(|c| c.get(email)) {
            log::debug!("Embedding cache hit for {}", email);
            return Ok(vector);
        }

        let vector = self
            .store
            .embedding_for(email, &self.property)
            .await?
            .ok_or_else(|| PeermatchError::NoEmbedding(email.to_string()))?;

        if let Some(cache) = &self.cache {
            cache.put(email.to_string(), vector.clone());
        }
        Ok(vector)
    }

    /// Up to `k` users most similar to `email`, highest score first, never
    /// including `email` itself.
    ///
    /// The index is asked for `k + 1` neighbors so a self match can be dropped
    /// without coming up short.
    pub async fn find_similar(&self, email: &str, k: usize) -> Result<Vec<SimilarPerson>> {
        let email = email.trim();
        if email.is_empty() {
            return Err(PeermatchError::InvalidInput("email must not be empty".to_string()));
        }
        if k == 0 || k > MAX_TOP_K {
            return Err(PeermatchError::InvalidInput(format!(
                "k must be between 1 and {}, got {}",
                MAX_TOP_K, k
            )));
        }

        let vector = self.query_vector(email).await?;
        let request = QueryRequest {
            vector,
            top_k: k.saturating_add(1),
            filter: Some(MetadataFilter::StatusEq(PersonStatus::User)),
            include_metadata: false,
        };
        let matches = self.index.query(&self.handle, &request).await?;

        let mut similar: Vec<SimilarPerson> = matches
            .into_iter()
            .filter(|m| m.id != email)
            .map(|m| SimilarPerson {
                email: m.id,
                score: m.score,
            })
            .collect();
        similar.sort_by(|a, b| b.score.total_cmp(&a.score));
        similar.truncate(k);

        log::debug!("Found {} similar people for {}", similar.len(), email);
        Ok(similar)
    }

    /// Like [`find_similar`](Self::find_similar) but never fails: errors are
    /// logged and reported in the result.
    pub async fn recommend(&self, email: &str, k: usize) -> Recommendation {
        match self.find_similar(email, k).await {
            Ok(matches) => Recommendation {
                query: email.to_string(),
                top_k: k,
                matches,
                error: None,
            },
            Err(e) => {
                log::error!("Similarity query for {} failed: {}", email, e);
                Recommendation::failed(email, k, &e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::PersonEmbeddingRecord;
    use crate::index::{IndexMetric, IndexSpec, IndexSync, MemoryIndex, SyncSettings};
    use crate::testutil::MemoryGraphStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryGraphStore>,
        index: Arc<MemoryIndex>,
        service: SimilarityService,
    }

    fn person(email: &str, vector: [f32; 2], alumni: bool) -> PersonEmbeddingRecord {
        PersonEmbeddingRecord {
            email: email.to_string(),
            vector: vector.to_vec(),
            status: if alumni { PersonStatus::Alumni } else { PersonStatus::User },
            scholarship_id: if alumni { Some("Fund1".to_string()) } else { None },
        }
    }

    async fn fixture() -> Fixture {
        let people = vec![
            person("a@x.com", [1.0, 0.05], true),
            person("b@x.com", [1.0, 0.0], false),
            person("twin@x.com", [1.0, 0.0], false),
            person("c@x.com", [0.9, 0.3], false),
            person("d@x.com", [0.5, 0.5], false),
            person("e@x.com", [0.1, 1.0], false),
            person("f@x.com", [-1.0, 0.2], false),
            person("g@x.com", [0.7, -0.7], false),
            person("h@x.com", [0.2, -1.0], false),
            person("old@x.com", [0.99, 0.01], true),
        ];

        let store = Arc::new(MemoryGraphStore::new());
        for p in &people {
            store.set_embedding(&p.email, p.vector.clone());
        }

        let index = Arc::new(MemoryIndex::new());
        let spec = IndexSpec {
            name: "person-embeddings".to_string(),
            dimension: 2,
            metric: IndexMetric::Cosine,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        };
        let sync = IndexSync::new(index.clone(), spec, SyncSettings::default());
        let handle = sync.ensure_index().await.unwrap();
        sync.sync(&handle, &people).await.unwrap();

        let service = SimilarityService::new(store.clone(), index.clone(), handle, "node2vec_emb".to_string());
        Fixture { store, index, service }
    }

    #[tokio::test]
    async fn test_user_query_excludes_self_and_alumni() {
        let f = fixture().await;
        let matches = f.service.find_similar("b@x.com", 6).await.unwrap();

        assert_eq!(matches.len(), 6);
        assert!(matches.iter().all(|m| m.email != "b@x.com"));
        assert!(matches.iter().all(|m| m.email != "a@x.com" && m.email != "old@x.com"));
        assert_eq!(matches[0].email, "twin@x.com");
        assert!(matches.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_alumni_can_query_but_only_see_users() {
        let f = fixture().await;
        let matches = f.service.find_similar("a@x.com", 3).await.unwrap();
        assert_eq!(matches.len(), 3);
        assert!(matches.iter().all(|m| m.email != "a@x.com" && m.email != "old@x.com"));
    }

    #[tokio::test]
    async fn test_k_is_respected_without_self_match() {
        let f = fixture().await;
        let matches = f.service.find_similar("c@x.com", 1).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_ne!(matches[0].email, "c@x.com");
    }

    #[tokio::test]
    async fn test_fewer_candidates_than_k() {
        let f = fixture().await;
        let matches = f.service.find_similar("b@x.com", 50).await.unwrap();
        // Seven users besides b
        assert_eq!(matches.len(), 7);
    }

    #[tokio::test]
    async fn test_missing_embedding_skips_index() {
        let f = fixture().await;
        let err = f.service.find_similar("nobody@x.com", 6).await.unwrap_err();
        assert!(matches!(err, PeermatchError::NoEmbedding(ref e) if e == "nobody@x.com"));
        assert_eq!(err.to_string(), "No embedding for identifier: nobody@x.com");
        assert_eq!(f.index.query_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_k_rejected() {
        let f = fixture().await;
        let err = f.service.find_similar("b@x.com", 0).await.unwrap_err();
        assert!(matches!(err, PeermatchError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_oversized_k_rejected_without_query() {
        let f = fixture().await;
        let err = f.service.find_similar("b@x.com", MAX_TOP_K + 1).await.unwrap_err();
        assert!(matches!(err, PeermatchError::InvalidInput(_)));

        let rec = f.service.recommend("b@x.com", usize::MAX).await;
        assert!(rec.matches.is_empty());
        assert!(rec.error.unwrap().contains("k must be between"));
        assert_eq!(f.index.query_count(), 0);

        let matches = f.service.find_similar("b@x.com", MAX_TOP_K).await.unwrap();
        assert_eq!(matches.len(), 7);
    }

    #[tokio::test]
    async fn test_recommend_reports_failure() {
        let f = fixture().await;
        f.store.set_offline(true);
        let rec = f.service.recommend("b@x.com", 6).await;
        assert!(rec.matches.is_empty());
        assert!(rec.error.is_some());
        assert_eq!(rec.query, "b@x.com");
        assert_eq!(rec.top_k, 6);
    }

    #[tokio::test]
    async fn test_cache_avoids_second_lookup() {
        let f = fixture().await;
        let service = f
            .service
            .with_cache(Arc::new(EmbeddingCache::new(10, Duration::from_secs(3600))));
        service.find_similar("b@x.com", 3).await.unwrap();
        service.find_similar("b@x.com", 3).await.unwrap();
        assert_eq!(f.store.embedding_reads(), 1);
    }

    #[tokio::test]
    async fn test_rewritten_vector_used_once_cache_entry_expires() {
        let f = fixture().await;
        let service = f
            .service
            .with_cache(Arc::new(EmbeddingCache::new(10, Duration::from_millis(50))));

        f.store.set_embedding("q@x.com", vec![1.0, 0.0]);
        let first = service.find_similar("q@x.com", 1).await.unwrap();
        assert_eq!(first[0].email, "b@x.com");

        // A later run moves q next to e
        f.store.set_embedding("q@x.com", vec![0.1, 1.0]);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = service.find_similar("q@x.com", 1).await.unwrap();
        assert_eq!(second[0].email, "e@x.com");
        assert_eq!(f.store.embedding_reads(), 2);
    }
}
