//! End-to-end embedding run: project, train, extract, publish.

use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::embeddings::{extract_embeddings, TrainingParams};
use crate::error::Result;
use crate::graph::{GraphAnalytics, GraphStore, ProjectionSpec};
use crate::index::{IndexSync, VectorIndex};

/// Counts from one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub projected_nodes: usize,
    pub projected_relationships: usize,
    pub embedded: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub upserted: usize,
    pub batches: usize,
    /// Index entries removed because their person no longer has a vector
    pub pruned: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Reuse the vectors already stored on Person nodes
    pub skip_training: bool,
}

pub struct Pipeline {
    store: Arc<dyn GraphStore>,
    analytics: Arc<dyn GraphAnalytics>,
    sync: IndexSync,
    projection: ProjectionSpec,
    params: TrainingParams,
    property: String,
    keep_projection: bool,
    prune_stale: bool,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn GraphStore>,
        analytics: Arc<dyn GraphAnalytics>,
        sync: IndexSync,
        projection: ProjectionSpec,
        params: TrainingParams,
        property: String,
    ) -> Self {
        Self {
            store,
            analytics,
            sync,
            projection,
            params,
            property,
            keep_projection: false,
            prune_stale: true,
        }
    }

    /// Wire a pipeline from configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn GraphStore>,
        analytics: Arc<dyn GraphAnalytics>,
        index: Arc<dyn VectorIndex>,
    ) -> anyhow::Result<Self> {
        let pipeline = Self::new(
            store,
            analytics,
            IndexSync::from_config(index, config),
            config.projection_spec()?,
            config.training_params(),
            config.embedding.property.clone(),
        )
        .keep_projection(config.projection.keep_after_run)
        .prune_stale(config.index.prune_stale);
        Ok(pipeline)
    }

    pub fn keep_projection(mut self, keep: bool) -> Self {
        self.keep_projection = keep;
        self
    }

    pub fn prune_stale(mut self, prune: bool) -> Self {
        self.prune_stale = prune;
        self
    }

    /// Run every step in order. Any failure aborts the run; re-running is safe.
    pub async fn run(&self, options: RunOptions) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();

        if options.skip_training {
            log::info!("Skipping training, using stored '{}' vectors", self.property);
        } else {
            self.train(&mut report).await?;
        }

        let extraction = extract_embeddings(self.store.as_ref(), &self.property, self.params.dimension).await?;
        report.extracted = extraction.records.len();
        report.skipped = extraction.skipped;

        let handle = self.sync.ensure_index().await?;
        let sync = self.sync.sync(&handle, &extraction.records).await?;
        report.upserted = sync.upserted;
        report.batches = sync.batches;
        if self.prune_stale {
            report.pruned = self.sync.prune(&handle, &extraction.records).await?;
        }

        log::info!(
            "Pipeline complete: {} embedded, {} extracted, {} skipped, {} upserted in {} batches, {} pruned",
            report.embedded,
            report.extracted,
            report.skipped,
            report.upserted,
            report.batches,
            report.pruned
        );
        Ok(report)
    }

    async fn train(&self, report: &mut PipelineReport) -> Result<()> {
        let name = &self.projection.graph_name;
        self.analytics.drop_projection(name, false).await?;

        let handle = self.analytics.project(&self.projection).await?;
        report.projected_nodes = handle.node_count;
        report.projected_relationships = handle.relationship_count;

        let embedded = self.analytics.embed(&handle, &self.params, &self.property).await;
        if !self.keep_projection || embedded.is_err() {
            if let Err(e) = self.analytics.drop_projection(name, false).await {
                log::warn!("Failed to drop projection '{}': {}", name, e);
            }
        }
        report.embedded = embedded?.nodes_embedded;
        Ok(())
    }
}
