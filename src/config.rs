use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::embeddings::TrainingParams;
use crate::graph::{Orientation, ProjectionSpec, RelationshipType, RelationshipWeight};
use crate::index::{IndexMetric, IndexSpec};
use crate::search::MAX_TOP_K;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Neo4j connection settings. Credentials are read from the named environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub database: String,
    pub user_env: String,
    pub password_env: String,
    pub max_connections: usize,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            database: "neo4j".to_string(),
            user_env: "NEO4J_USERNAME".to_string(),
            password_env: "NEO4J_PASSWORD".to_string(),
            max_connections: 10,
            fetch_size: 500,
        }
    }
}

/// Training graph projection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub graph_name: String,
    pub orientation: Orientation,
    /// Keep the named projection alive after the run (GDS backend only holds memory).
    pub keep_after_run: bool,
    /// Relationship type -> default edge weight
    pub weights: BTreeMap<String, f64>,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            graph_name: "person_background_graph".to_string(),
            orientation: Orientation::Undirected,
            keep_after_run: false,
            weights: ProjectionSpec::default_weights()
                .into_iter()
                .map(|w| (w.rel_type.as_str().to_string(), w.default_weight))
                .collect(),
        }
    }
}

/// Which engine runs projection and training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainerBackend {
    /// In-process node2vec over a projection read from the graph store
    Native,
    /// Neo4j Graph Data Science procedures
    Gds,
}

/// Embedding training configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: TrainerBackend,
    /// Person node property holding the vector
    pub property: String,
    pub dimension: usize,
    pub walk_length: usize,
    pub walks_per_node: usize,
    pub iterations: usize,
    pub window_size: usize,
    pub negative_samples: usize,
    pub return_factor: f64,
    pub in_out_factor: f64,
    pub initial_learning_rate: f32,
    pub min_learning_rate: f32,
    pub seed: u64,
    /// Rows per UNWIND statement when writing vectors back
    pub write_batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let params = TrainingParams::default();
        Self {
            backend: TrainerBackend::Native,
            property: "node2vec_emb".to_string(),
            dimension: params.dimension,
            walk_length: params.walk_length,
            walks_per_node: params.walks_per_node,
            iterations: params.iterations,
            window_size: params.window_size,
            negative_samples: params.negative_samples,
            return_factor: params.return_factor,
            in_out_factor: params.in_out_factor,
            initial_learning_rate: params.initial_learning_rate,
            min_learning_rate: params.min_learning_rate,
            seed: params.seed,
            write_batch_size: 500,
        }
    }
}

/// Vector index (Pinecone) configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub name: String,
    pub api_key_env: String,
    /// Optional env var holding the data-plane host; skips the describe lookup
    pub host_env: String,
    pub control_plane_url: String,
    pub api_version: String,
    pub cloud: String,
    pub region: String,
    pub metric: IndexMetric,
    pub namespace: Option<String>,
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_retries: usize,
    pub request_timeout_secs: u64,
    pub ready_timeout_secs: u64,
    /// Delete index entries for persons that no longer have a vector
    pub prune_stale: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "person-embeddings".to_string(),
            api_key_env: "PINECONE_API_KEY".to_string(),
            host_env: "PINECONE_HOST".to_string(),
            control_plane_url: "https://api.pinecone.io".to_string(),
            api_version: "2024-07".to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            metric: IndexMetric::Cosine,
            namespace: None,
            batch_size: 100,
            concurrency: 4,
            max_retries: 3,
            request_timeout_secs: 30,
            ready_timeout_secs: 120,
            prune_stale: true,
        }
    }
}

/// Similarity query configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_top_k: usize,
    /// Person embeddings kept in the LRU cache; 0 disables the cache
    pub cache_capacity: usize,
    /// Seconds a cached embedding stays valid; 0 disables the cache
    pub cache_ttl_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_top_k: 6,
            cache_capacity: 1000,
            cache_ttl_secs: 60,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            allowed_origins: vec![],
        }
    }
}

/// Upstream limit on vectors per upsert request
const MAX_UPSERT_BATCH: usize = 1000;

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in PEERMATCH_CONFIG environment variable (must exist)
    /// 2. ./config.toml in current directory (defaults are used when absent)
    ///
    /// `NEO4J_URI` and `NEO4J_DB` override the graph section when set.
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignore errors - file is optional)
        let _ = dotenv::dotenv();

        let mut config = match std::env::var("PEERMATCH_CONFIG") {
            Ok(path) => Self::from_file(PathBuf::from(path))?,
            Err(_) => {
                let default_path = PathBuf::from("config.toml");
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    log::debug!("No config.toml found, using defaults");
                    Config::default()
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn from_file(path: PathBuf) -> Result<Self> {
        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parse configuration from a TOML string without validation.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Invalid configuration TOML")?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(uri) = std::env::var("NEO4J_URI") {
            if !uri.trim().is_empty() {
                self.graph.uri = uri;
            }
        }
        if let Ok(db) = std::env::var("NEO4J_DB") {
            if !db.trim().is_empty() {
                self.graph.database = db;
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.graph.uri.trim().is_empty() {
            anyhow::bail!("graph.uri must not be empty");
        }

        if !is_identifier(&self.embedding.property) {
            anyhow::bail!(
                "embedding.property must be a plain identifier (letters, digits, underscore): {}",
                self.embedding.property
            );
        }

        if self.embedding.dimension == 0 {
            anyhow::bail!("embedding.dimension must be greater than 0");
        }

        if self.embedding.walk_length < 2 {
            anyhow::bail!("embedding.walk_length must be at least 2");
        }

        if self.embedding.walks_per_node == 0 || self.embedding.iterations == 0 {
            anyhow::bail!("embedding.walks_per_node and embedding.iterations must be greater than 0");
        }

        if self.embedding.window_size == 0 {
            anyhow::bail!("embedding.window_size must be greater than 0");
        }

        if self.embedding.return_factor <= 0.0 || self.embedding.in_out_factor <= 0.0 {
            anyhow::bail!("embedding.return_factor and embedding.in_out_factor must be positive");
        }

        if self.embedding.write_batch_size == 0 {
            anyhow::bail!("embedding.write_batch_size must be greater than 0");
        }

        // Parses and checks every weight
        self.projection_spec()?;

        if self.index.metric != IndexMetric::Cosine {
            anyhow::bail!("index.metric must be cosine, got {}", self.index.metric.as_str());
        }

        if self.index.batch_size == 0 || self.index.batch_size > MAX_UPSERT_BATCH {
            anyhow::bail!("index.batch_size must be between 1 and {}", MAX_UPSERT_BATCH);
        }

        if self.index.concurrency == 0 {
            anyhow::bail!("index.concurrency must be greater than 0");
        }

        if self.query.default_top_k == 0 || self.query.default_top_k > MAX_TOP_K {
            anyhow::bail!("query.default_top_k must be between 1 and {}", MAX_TOP_K);
        }

        Ok(())
    }

    /// Build the projection spec from the weight table.
    pub fn projection_spec(&self) -> Result<ProjectionSpec> {
        let mut weights = Vec::with_capacity(self.projection.weights.len());
        for (name, weight) in &self.projection.weights {
            let rel_type: RelationshipType = name
                .parse()
                .map_err(|e| anyhow::anyhow!("projection.weights: {}", e))?;
            weights.push(RelationshipWeight::new(rel_type, *weight));
        }
        let spec = ProjectionSpec {
            graph_name: self.projection.graph_name.clone(),
            weights,
            orientation: self.projection.orientation,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Trainer hyperparameters
    pub fn training_params(&self) -> TrainingParams {
        TrainingParams {
            dimension: self.embedding.dimension,
            walk_length: self.embedding.walk_length,
            walks_per_node: self.embedding.walks_per_node,
            iterations: self.embedding.iterations,
            window_size: self.embedding.window_size,
            negative_samples: self.embedding.negative_samples,
            return_factor: self.embedding.return_factor,
            in_out_factor: self.embedding.in_out_factor,
            initial_learning_rate: self.embedding.initial_learning_rate,
            min_learning_rate: self.embedding.min_learning_rate,
            seed: self.embedding.seed,
        }
    }

    /// Parameters for creating the vector index
    pub fn index_spec(&self) -> IndexSpec {
        IndexSpec {
            name: self.index.name.clone(),
            dimension: self.embedding.dimension,
            metric: self.index.metric,
            cloud: self.index.cloud.clone(),
            region: self.index.region.clone(),
        }
    }

    /// Neo4j username and password from the environment
    pub fn graph_credentials(&self) -> Result<(String, String)> {
        let user = read_env(&self.graph.user_env)?;
        let password = read_env(&self.graph.password_env)?;
        Ok((user, password))
    }

    /// Pinecone API key from the environment
    pub fn index_api_key(&self) -> Result<String> {
        read_env(&self.index.api_key_env)
    }

    /// Pinecone data-plane host from the environment, if configured
    pub fn index_host(&self) -> Option<String> {
        if self.index.host_env.is_empty() {
            return None;
        }
        std::env::var(&self.index.host_env)
            .ok()
            .filter(|h| !h.trim().is_empty())
    }
}

fn read_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| {
        format!(
            "Environment variable {} not set. Set it in your .env file or as an environment variable.",
            name
        )
    })
}

/// Property names are interpolated into Cypher, so only plain identifiers are allowed.
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
