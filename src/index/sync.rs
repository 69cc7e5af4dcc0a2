use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::embeddings::PersonEmbeddingRecord;
use crate::error::{PeermatchError, Result};
use crate::index::{IndexDescription, IndexEntry, IndexHandle, IndexSpec, VectorIndex};

/// Batching, concurrency and retry settings for publishing vectors.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_retries: usize,
    /// First backoff delay; doubled after every retry
    pub initial_backoff: Duration,
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 4,
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(120),
            ready_poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub records: usize,
    pub batches: usize,
    pub upserted: usize,
}

/// Publishes person embeddings into a similarity index.
pub struct IndexSync {
    index: Arc<dyn VectorIndex>,
    spec: IndexSpec,
    host_override: Option<String>,
    namespace: Option<String>,
    settings: SyncSettings,
}

impl IndexSync {
    pub fn new(index: Arc<dyn VectorIndex>, spec: IndexSpec, settings: SyncSettings) -> Self {
        Self {
            index,
            spec,
            host_override: None,
            namespace: None,
            settings,
        }
    }

    /// Build from the `[index]` and `[embedding]` sections.
    pub fn from_config(index: Arc<dyn VectorIndex>, config: &Config) -> Self {
        let settings = SyncSettings {
            batch_size: config.index.batch_size,
            concurrency: config.index.concurrency,
            max_retries: config.index.max_retries,
            ready_timeout: Duration::from_secs(config.index.ready_timeout_secs),
            ..SyncSettings::default()
        };
        Self::new(index, config.index_spec(), settings)
            .with_host(config.index_host())
            .with_namespace(config.index.namespace.clone())
    }

    /// Use this data-plane host instead of the one the control plane reports.
    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host_override = host;
        self
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    fn check_compatible(&self, description: &IndexDescription) -> Result<()> {
        if description.dimension != self.spec.dimension || description.metric != self.spec.metric {
            return Err(PeermatchError::Config(format!(
                "index '{}' exists with dimension {} and metric {}, expected dimension {} and metric {}",
                description.name,
                description.dimension,
                description.metric.as_str(),
                self.spec.dimension,
                self.spec.metric.as_str()
            )));
        }
        Ok(())
    }

    fn handle_for(&self, description: &IndexDescription) -> Result<IndexHandle> {
        let host = match &self.host_override {
            Some(host) => host.clone(),
            None if !description.host.is_empty() => description.host.clone(),
            None => {
                return Err(PeermatchError::Index(format!(
                    "index '{}' has no data-plane host yet",
                    description.name
                )))
            }
        };
        Ok(IndexHandle {
            name: description.name.clone(),
            host,
            namespace: self.namespace.clone(),
        })
    }

    /// Make sure the index exists with the expected dimension and metric, creating
    /// it if needed, and wait until it is ready.
    pub async fn ensure_index(&self) -> Result<IndexHandle> {
        let existing = self
            .index
            .list_indexes()
            .await?
            .into_iter()
            .find(|d| d.name == self.spec.name);

        let description = match existing {
            Some(description) => {
                log::info!("Index '{}' already exists", description.name);
                self.check_compatible(&description)?;
                description
            }
            None => match self.index.create_index(&self.spec).await {
                Ok(description) => {
                    log::info!(
                        "Created index '{}' with dimension {} ({})",
                        self.spec.name,
                        self.spec.dimension,
                        self.spec.metric.as_str()
                    );
                    description
                }
                // Created concurrently by someone else
                Err(PeermatchError::IndexApi { status: 409, .. }) => {
                    let description = self.index.describe_index(&self.spec.name).await?;
                    self.check_compatible(&description)?;
                    description
                }
                Err(e) => return Err(e),
            },
        };

        let description = self.wait_until_ready(description).await?;
        self.handle_for(&description)
    }

    async fn wait_until_ready(&self, mut description: IndexDescription) -> Result<IndexDescription> {
        let deadline = Instant::now() + self.settings.ready_timeout;
        while !description.ready {
            if Instant::now() >= deadline {
                return Err(PeermatchError::Index(format!(
                    "index '{}' not ready after {:?}",
                    description.name, self.settings.ready_timeout
                )));
            }
            log::debug!("Waiting for index '{}' to become ready", description.name);
            tokio::time::sleep(self.settings.ready_poll_interval).await;
            description = self.index.describe_index(&description.name).await?;
        }
        Ok(description)
    }

    /// Handle for an index that must already exist. No control-plane call when
    /// a host override is set.
    pub async fn resolve_handle(&self) -> Result<IndexHandle> {
        if let Some(host) = &self.host_override {
            return Ok(IndexHandle {
                name: self.spec.name.clone(),
                host: host.clone(),
                namespace: self.namespace.clone(),
            });
        }
        let description = self.index.describe_index(&self.spec.name).await?;
        self.check_compatible(&description)?;
        self.handle_for(&description)
    }

    /// Upsert every record in batches of `batch_size`, one call per batch.
    ///
    /// Batches run concurrently up to `concurrency`. The first failed batch
    /// aborts the sync and drops the batches still in flight.
    pub async fn sync(&self, handle: &IndexHandle, records: &[PersonEmbeddingRecord]) -> Result<SyncReport> {
        if let Some(bad) = records.iter().find(|r| r.vector.len() != self.spec.dimension) {
            return Err(PeermatchError::InvalidInput(format!(
                "embedding for {} has {} values, index '{}' expects {}",
                bad.email,
                bad.vector.len(),
                self.spec.name,
                self.spec.dimension
            )));
        }

        let entries: Vec<IndexEntry> = records.iter().map(IndexEntry::from_record).collect();
        let batch_size = self.settings.batch_size.max(1);
        let batches: Vec<&[IndexEntry]> = entries.chunks(batch_size).collect();
        let mut report = SyncReport {
            records: records.len(),
            batches: batches.len(),
            upserted: 0,
        };
        if batches.is_empty() {
            log::info!("No embeddings to sync into '{}'", handle.name);
            return Ok(report);
        }

        let start = Instant::now();
        let mut results = stream::iter(batches.into_iter().enumerate())
            .map(|(n, batch)| self.upsert_with_retry(handle, n, batch))
            .buffer_unordered(self.settings.concurrency.max(1));

        while let Some(result) = results.next().await {
            report.upserted += result?;
        }

        log::info!(
            "Upserted {} vectors into '{}' in {} batches ({:?})",
            report.upserted,
            handle.name,
            report.batches,
            start.elapsed()
        );
        Ok(report)
    }

    /// Delete index entries whose id is not among `records`, in batches of
    /// `batch_size`. Returns how many ids were removed.
    ///
    /// An empty `records` leaves the index untouched.
    pub async fn prune(&self, handle: &IndexHandle, records: &[PersonEmbeddingRecord]) -> Result<usize> {
        if records.is_empty() {
            log::warn!("No embeddings extracted, not pruning '{}'", handle.name);
            return Ok(0);
        }

        let keep: HashSet<&str> = records.iter().map(|r| r.email.as_str()).collect();
        let stale: Vec<String> = self
            .with_retry("list ids", || self.index.list_ids(handle))
            .await?
            .into_iter()
            .filter(|id| !keep.contains(id.as_str()))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        for (n, batch) in stale.chunks(self.settings.batch_size.max(1)).enumerate() {
            let what = format!("delete batch {}", n);
            self.with_retry(&what, || self.index.delete(handle, batch)).await?;
        }
        log::info!("Removed {} stale vectors from '{}'", stale.len(), handle.name);
        Ok(stale.len())
    }

    async fn upsert_with_retry(&self, handle: &IndexHandle, batch_no: usize, batch: &[IndexEntry]) -> Result<usize> {
        let what = format!("Batch {}", batch_no);
        let count = self.with_retry(&what, || self.index.upsert(handle, batch)).await?;
        log::debug!("{} upserted {} vectors", what, count);
        Ok(count)
    }

    /// Run `op`, retrying retryable failures with exponential backoff.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut delay = self.settings.initial_backoff;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.settings.max_retries && e.is_retryable() => {
                    log::warn!(
                        "{}: retry {}/{} after error: {}",
                        what,
                        attempt + 1,
                        self.settings.max_retries,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("{} failed: {}", what, e);
                    return Err(e);
                }
            }
        }
    }
}
