//! Construct the runtime components from a loaded [`Config`].

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::EmbeddingCache;
use crate::config::{Config, TrainerBackend};
use crate::graph::{GdsAnalytics, GraphAnalytics, GraphStore, NativeAnalytics, Neo4jStore};
use crate::index::{IndexSync, PineconeClient, VectorIndex};
use crate::search::SimilarityService;

/// Connect to Neo4j with credentials from the environment.
pub async fn connect_graph(config: &Config) -> Result<Arc<Neo4jStore>> {
    let (user, password) = config.graph_credentials()?;
    let store = Neo4jStore::connect(&config.graph, &user, &password, config.embedding.write_batch_size)
        .await
        .with_context(|| format!("Failed to connect to Neo4j at {}", config.graph.uri))?;
    Ok(Arc::new(store))
}

/// Pinecone client with the API key from the environment.
pub fn pinecone_client(config: &Config) -> Result<Arc<PineconeClient>> {
    let api_key = config.index_api_key()?;
    let client = PineconeClient::new(
        api_key,
        &config.index.control_plane_url,
        config.index.api_version.clone(),
        Duration::from_secs(config.index.request_timeout_secs),
    )?;
    Ok(Arc::new(client))
}

/// Analytics backend selected by `embedding.backend`.
pub fn analytics(config: &Config, store: Arc<Neo4jStore>) -> Arc<dyn GraphAnalytics> {
    match config.embedding.backend {
        TrainerBackend::Native => Arc::new(NativeAnalytics::new(store)),
        TrainerBackend::Gds => Arc::new(GdsAnalytics::new(&store)),
    }
}

/// Query service bound to an existing index, with the LRU cache when enabled.
pub async fn similarity_service(
    config: &Config,
    store: Arc<dyn GraphStore>,
    index: Arc<dyn VectorIndex>,
) -> Result<SimilarityService> {
    let handle = IndexSync::from_config(index.clone(), config)
        .resolve_handle()
        .await
        .with_context(|| format!("Failed to resolve index '{}'", config.index.name))?;

    let service = SimilarityService::new(store, index, handle, config.embedding.property.clone());
    Ok(if config.query.cache_capacity > 0 && config.query.cache_ttl_secs > 0 {
        service.with_cache(Arc::new(EmbeddingCache::new(
            config.query.cache_capacity,
            Duration::from_secs(config.query.cache_ttl_secs),
        )))
    } else {
        service
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::testutil::MemoryGraphStore;

    fn config() -> Config {
        let mut config = Config::default();
        config.index.host_env = "PEERMATCH_SETUP_TEST_NO_HOST".to_string();
        config
    }

    #[tokio::test]
    async fn test_similarity_service_requires_index() {
        let config = config();
        let err = similarity_service(&config, Arc::new(MemoryGraphStore::new()), Arc::new(MemoryIndex::new()))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("person-embeddings"));
    }

    #[tokio::test]
    async fn test_similarity_service_with_cache() {
        let config = config();
        let index = Arc::new(MemoryIndex::new());
        IndexSync::from_config(index.clone(), &config)
            .ensure_index()
            .await
            .unwrap();
        let service = similarity_service(&config, Arc::new(MemoryGraphStore::new()), index)
            .await
            .unwrap();
        assert_eq!(service.cache().map(|c| c.ttl()), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let mut config = config();
        config.query.cache_ttl_secs = 0;
        let index = Arc::new(MemoryIndex::new());
        IndexSync::from_config(index.clone(), &config)
            .ensure_index()
            .await
            .unwrap();
        let service = similarity_service(&config, Arc::new(MemoryGraphStore::new()), index)
            .await
            .unwrap();
        assert!(service.cache().is_none());
    }

    #[test]
    fn test_pinecone_client_needs_key() {
        let mut config = Config::default();
        config.index.api_key_env = "PEERMATCH_SETUP_TEST_UNSET".to_string();
        std::env::remove_var("PEERMATCH_SETUP_TEST_UNSET");
        assert!(pinecone_client(&config).is_err());
    }
}
