//! Projection catalog and embedding backends.

use async_trait::async_trait;
use neo4rs::{query, Graph};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::is_identifier;
use crate::embeddings::{train_person_embeddings, TrainingParams};
use crate::error::{PeermatchError, Result};
use crate::graph::{build_projection, GraphStore, Neo4jStore, Projection, ProjectionSpec};

/// A named projection that exists in the analytics catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionHandle {
    pub name: String,
    pub node_count: usize,
    pub relationship_count: usize,
}

/// Outcome of an embedding run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbedSummary {
    /// Nodes that received a vector
    pub nodes_embedded: usize,
    /// Node properties written back to the store
    pub properties_written: usize,
}

/// Graph analytics contract: projection lifecycle plus embedding write-back.
#[async_trait]
pub trait GraphAnalytics: Send + Sync {
    /// Drop a projection. Returns whether one existed.
    async fn drop_projection(&self, name: &str, fail_if_missing: bool) -> Result<bool>;

    /// Create a projection from the current store contents.
    async fn project(&self, spec: &ProjectionSpec) -> Result<ProjectionHandle>;

    /// Train embeddings over a projection and write them to `write_property`.
    async fn embed(
        &self,
        projection: &ProjectionHandle,
        params: &TrainingParams,
        write_property: &str,
    ) -> Result<EmbedSummary>;
}

/// In-process backend: projections live in memory, training runs on a blocking thread.
pub struct NativeAnalytics {
    store: Arc<dyn GraphStore>,
    catalog: Mutex<HashMap<String, Arc<Projection>>>,
}

impl NativeAnalytics {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            catalog: Mutex::new(HashMap::new()),
        }
    }

    fn catalog(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Projection>>> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GraphAnalytics for NativeAnalytics {
    async fn drop_projection(&self, name: &str, fail_if_missing: bool) -> Result<bool> {
        let existed = self.catalog().remove(name).is_some();
        if !existed && fail_if_missing {
            return Err(PeermatchError::Projection(format!(
                "projection '{}' does not exist",
                name
            )));
        }
        Ok(existed)
    }

    async fn project(&self, spec: &ProjectionSpec) -> Result<ProjectionHandle> {
        if self.catalog().contains_key(&spec.graph_name) {
            return Err(PeermatchError::Projection(format!(
                "projection '{}' already exists",
                spec.graph_name
            )));
        }

        let projection = build_projection(self.store.as_ref(), spec).await?;
        let handle = ProjectionHandle {
            name: projection.name().to_string(),
            node_count: projection.node_count(),
            relationship_count: projection.relationship_count(),
        };
        self.catalog()
            .insert(spec.graph_name.clone(), Arc::new(projection));
        Ok(handle)
    }

    async fn embed(
        &self,
        projection: &ProjectionHandle,
        params: &TrainingParams,
        write_property: &str,
    ) -> Result<EmbedSummary> {
        let graph = self.catalog().get(&projection.name).cloned().ok_or_else(|| {
            PeermatchError::Projection(format!("projection '{}' does not exist", projection.name))
        })?;

        log::info!(
            "Running node2vec on '{}' (dimension={}, walk_length={}, iterations={})",
            projection.name,
            params.dimension,
            params.walk_length,
            params.iterations
        );
        let start = std::time::Instant::now();
        let params = params.clone();
        let vectors = tokio::task::spawn_blocking(move || train_person_embeddings(&graph, &params))
            .await
            .map_err(|e| PeermatchError::Training(format!("training task failed: {}", e)))??;
        log::info!("Trained {} person embeddings in {:?}", vectors.len(), start.elapsed());

        let written = self.store.write_embeddings(write_property, &vectors).await?;
        Ok(EmbedSummary {
            nodes_embedded: vectors.len(),
            properties_written: written,
        })
    }
}

/// Neo4j Graph Data Science backend.
///
/// `gds.node2vec.write` writes every projected node, so after training the
/// vectors on reference nodes and on persons without a projected relationship
/// are removed again.
pub struct GdsAnalytics {
    graph: Graph,
    specs: Mutex<HashMap<String, ProjectionSpec>>,
}

impl GdsAnalytics {
    pub fn new(store: &Neo4jStore) -> Self {
        Self {
            graph: store.inner().clone(),
            specs: Mutex::new(HashMap::new()),
        }
    }

    /// Spec a projection was created with; defaults for projections made by another process.
    fn spec_for(&self, name: &str) -> ProjectionSpec {
        self.specs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_else(|| ProjectionSpec::with_defaults(name))
    }

    /// Remove vectors GDS wrote outside the connected persons. Returns
    /// `(cleared, persons_embedded)`.
    async fn clear_unconnected(&self, spec: &ProjectionSpec, property: &str) -> Result<(usize, usize)> {
        let types: Vec<String> = spec.weights.iter().map(|w| w.rel_type.as_str().to_string()).collect();
        let q = query(&clear_unconnected_query(property))
            .param("labels", node_labels(spec))
            .param("types", types);
        let mut stream = self.graph.execute(q).await?;
        let cleared: i64 = match stream.next().await? {
            Some(row) => row.get("cleared").unwrap_or(0),
            None => 0,
        };

        let q = query(&format!(
            "MATCH (p:Person) WHERE p.{} IS NOT NULL RETURN count(p) AS embedded",
            property
        ));
        let mut stream = self.graph.execute(q).await?;
        let embedded: i64 = match stream.next().await? {
            Some(row) => row.get("embedded").unwrap_or(0),
            None => 0,
        };
        Ok((cleared.max(0) as usize, embedded.max(0) as usize))
    }
}

/// Cypher removing `property` from projected reference nodes and from persons
/// with none of the projected relationship types. `property` must be a plain identifier.
fn clear_unconnected_query(property: &str) -> String {
    format!(
        "MATCH (n) WHERE n.{prop} IS NOT NULL AND any(l IN labels(n) WHERE l IN $labels)
           AND (NOT n:Person OR NOT EXISTS {{ MATCH (n)-[r]-() WHERE type(r) IN $types }})
         REMOVE n.{prop}
         RETURN count(n) AS cleared",
        prop = property
    )
}

/// Person plus every reference label reachable through the projected types.
fn node_labels(spec: &ProjectionSpec) -> Vec<String> {
    let mut labels = vec!["Person".to_string()];
    for w in &spec.weights {
        let label = w.rel_type.target_label().to_string();
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    labels
}

/// Cypher map literal for the `relationshipProjection` argument.
fn relationship_projection(spec: &ProjectionSpec) -> String {
    let entries: Vec<String> = spec
        .weights
        .iter()
        .map(|w| {
            format!(
                "{}: {{orientation: '{}', properties: {{weight: {{property: 'weight', defaultValue: {:?}}}}}}}",
                w.rel_type.as_str(),
                spec.orientation.as_gds(),
                w.default_weight
            )
        })
        .collect();
    format!("{{{}}}", entries.join(", "))
}

#[async_trait]
impl GraphAnalytics for GdsAnalytics {
    async fn drop_projection(&self, name: &str, fail_if_missing: bool) -> Result<bool> {
        self.specs.lock().unwrap_or_else(PoisonError::into_inner).remove(name);
        let q = query("CALL gds.graph.drop($name, $failIfMissing) YIELD graphName RETURN graphName")
            .param("name", name)
            .param("failIfMissing", fail_if_missing);
        let mut stream = self.graph.execute(q).await?;
        let existed = stream.next().await?.is_some();
        log::info!("Dropped (if exists) projection '{}': existed={}", name, existed);
        Ok(existed)
    }

    async fn project(&self, spec: &ProjectionSpec) -> Result<ProjectionHandle> {
        spec.validate()?;
        let q = query(&format!(
            "CALL gds.graph.project($name, $labels, {})
             YIELD graphName, nodeCount, relationshipCount
             RETURN nodeCount, relationshipCount",
            relationship_projection(spec)
        ))
        .param("name", spec.graph_name.as_str())
        .param("labels", node_labels(spec));

        let mut stream = self.graph.execute(q).await?;
        let row = stream.next().await?.ok_or_else(|| {
            PeermatchError::Projection(format!("gds.graph.project returned no row for '{}'", spec.graph_name))
        })?;
        let node_count: i64 = row.get("nodeCount").unwrap_or(0);
        let relationship_count: i64 = row.get("relationshipCount").unwrap_or(0);
        log::info!(
            "Projected graph '{}': {} nodes, {} relationships",
            spec.graph_name,
            node_count,
            relationship_count
        );
        self.specs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.graph_name.clone(), spec.clone());
        Ok(ProjectionHandle {
            name: spec.graph_name.clone(),
            node_count: node_count.max(0) as usize,
            relationship_count: relationship_count.max(0) as usize,
        })
    }

    async fn embed(
        &self,
        projection: &ProjectionHandle,
        params: &TrainingParams,
        write_property: &str,
    ) -> Result<EmbedSummary> {
        params.validate()?;
        if !is_identifier(write_property) {
            return Err(PeermatchError::InvalidInput(format!(
                "embedding property is not a plain identifier: {}",
                write_property
            )));
        }
        if projection.relationship_count == 0 {
            return Err(PeermatchError::Training(format!(
                "projection '{}' has no relationships to walk",
                projection.name
            )));
        }

        let q = query(
            "CALL gds.node2vec.write($name, {
                embeddingDimension: $dimension,
                writeProperty: $property,
                walkLength: $walkLength,
                walksPerNode: $walksPerNode,
                iterations: $iterations,
                windowSize: $windowSize,
                negativeSamplingRate: $negativeSamples,
                returnFactor: $returnFactor,
                inOutFactor: $inOutFactor,
                initialLearningRate: $initialLearningRate,
                minLearningRate: $minLearningRate,
                relationshipWeightProperty: 'weight',
                randomSeed: $seed,
                concurrency: 1
             })
             YIELD nodeCount, nodePropertiesWritten
             RETURN nodeCount, nodePropertiesWritten",
        )
        .param("name", projection.name.as_str())
        .param("dimension", params.dimension as i64)
        .param("property", write_property)
        .param("walkLength", params.walk_length as i64)
        .param("walksPerNode", params.walks_per_node as i64)
        .param("iterations", params.iterations as i64)
        .param("windowSize", params.window_size as i64)
        .param("negativeSamples", params.negative_samples as i64)
        .param("returnFactor", params.return_factor)
        .param("inOutFactor", params.in_out_factor)
        .param("initialLearningRate", params.initial_learning_rate as f64)
        .param("minLearningRate", params.min_learning_rate as f64)
        .param("seed", params.seed as i64);

        let mut stream = self.graph.execute(q).await?;
        let row = stream.next().await?.ok_or_else(|| {
            PeermatchError::Training(format!("gds.node2vec.write returned no row for '{}'", projection.name))
        })?;
        let written: i64 = row.get("nodePropertiesWritten").unwrap_or(0);
        let written = written.max(0) as usize;

        let (cleared, embedded) = self
            .clear_unconnected(&self.spec_for(&projection.name), write_property)
            .await?;
        log::info!(
            "Embeddings written to node property '{}': {} persons, {} unconnected or reference nodes cleared",
            write_property,
            embedded,
            cleared
        );
        Ok(EmbedSummary {
            nodes_embedded: embedded,
            properties_written: written.saturating_sub(cleared),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Orientation, RelationshipType};
    use crate::testutil::MemoryGraphStore;

    fn small_params() -> TrainingParams {
        TrainingParams {
            dimension: 8,
            walk_length: 6,
            walks_per_node: 4,
            iterations: 2,
            window_size: 2,
            ..TrainingParams::default()
        }
    }

    fn sample_store() -> Arc<MemoryGraphStore> {
        let store = Arc::new(MemoryGraphStore::new());
        store.relate("a@x.com", RelationshipType::HasSkill, "rust");
        store.relate("b@x.com", RelationshipType::HasSkill, "rust");
        store.relate("b@x.com", RelationshipType::WorkedAt, "acme");
        store.add_person("isolated@x.com");
        store
    }

    #[tokio::test]
    async fn test_drop_missing_is_ok_unless_required() {
        let analytics = NativeAnalytics::new(sample_store());
        assert!(!analytics.drop_projection("g", false).await.unwrap());
        assert!(analytics.drop_projection("g", true).await.is_err());
    }

    #[tokio::test]
    async fn test_project_twice_requires_drop() {
        let analytics = NativeAnalytics::new(sample_store());
        let spec = ProjectionSpec::with_defaults("g");
        let handle = analytics.project(&spec).await.unwrap();
        assert_eq!(handle.node_count, 4);
        assert!(analytics.project(&spec).await.is_err());
        assert!(analytics.drop_projection("g", false).await.unwrap());
        assert!(analytics.project(&spec).await.is_ok());
    }

    #[tokio::test]
    async fn test_embed_writes_connected_persons_only() {
        let store = sample_store();
        let analytics = NativeAnalytics::new(store.clone());
        let handle = analytics.project(&ProjectionSpec::with_defaults("g")).await.unwrap();
        let summary = analytics.embed(&handle, &small_params(), "node2vec_emb").await.unwrap();

        assert_eq!(summary.nodes_embedded, 2);
        assert_eq!(summary.properties_written, 2);
        assert_eq!(store.embedding("a@x.com").unwrap().len(), 8);
        assert_eq!(store.embedding("b@x.com").unwrap().len(), 8);
        assert!(store.embedding("isolated@x.com").is_none());
    }

    #[tokio::test]
    async fn test_embed_unknown_projection() {
        let analytics = NativeAnalytics::new(sample_store());
        let handle = ProjectionHandle {
            name: "missing".to_string(),
            node_count: 0,
            relationship_count: 0,
        };
        let err = analytics.embed(&handle, &small_params(), "node2vec_emb").await.unwrap_err();
        assert!(matches!(err, PeermatchError::Projection(_)));
    }

    #[tokio::test]
    async fn test_embed_empty_projection_fails() {
        let store = Arc::new(MemoryGraphStore::new());
        store.add_person("alone@x.com");
        let analytics = NativeAnalytics::new(store);
        let handle = analytics.project(&ProjectionSpec::with_defaults("g")).await.unwrap();
        let err = analytics.embed(&handle, &small_params(), "node2vec_emb").await.unwrap_err();
        assert!(matches!(err, PeermatchError::Training(_)));
    }

    #[test]
    fn test_relationship_projection_literal() {
        let spec = ProjectionSpec {
            graph_name: "g".to_string(),
            weights: vec![crate::graph::RelationshipWeight::new(RelationshipType::HasSkill, 2.0)],
            orientation: Orientation::Undirected,
        };
        assert_eq!(
            relationship_projection(&spec),
            "{HAS_SKILL: {orientation: 'UNDIRECTED', properties: {weight: {property: 'weight', defaultValue: 2.0}}}}"
        );
    }

    #[test]
    fn test_node_labels_deduplicated() {
        let labels = node_labels(&ProjectionSpec::with_defaults("g"));
        assert_eq!(labels[0], "Person");
        assert_eq!(labels.len(), 8);
        assert!(labels.contains(&"Company".to_string()));
        assert!(!labels.contains(&"Scholarship".to_string()));
    }

    #[test]
    fn test_clear_unconnected_query() {
        let cypher = clear_unconnected_query("node2vec_emb");
        assert!(cypher.contains("MATCH (n) WHERE n.node2vec_emb IS NOT NULL"));
        assert!(cypher.contains("NOT n:Person OR NOT EXISTS { MATCH (n)-[r]-() WHERE type(r) IN $types }"));
        assert!(cypher.contains("REMOVE n.node2vec_emb"));
        assert!(cypher.contains("count(n) AS cleared"));
    }
}
