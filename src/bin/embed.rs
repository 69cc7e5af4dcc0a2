use anyhow::Result;
use clap::Parser;
use peermatch::index::{MemoryIndex, VectorIndex};
use peermatch::{setup, Config, Pipeline, RunOptions};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "embed")]
#[command(about = "Train person embeddings and publish them to the vector index")]
struct Args {
    /// Publish into an in-memory index instead of Pinecone
    #[arg(long)]
    dry_run: bool,

    /// Reuse the vectors already stored on Person nodes
    #[arg(long)]
    skip_training: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();

    log::info!("Starting Peermatch embedding run");
    log::info!(
        "Mode: {}{}",
        if args.skip_training { "SYNC ONLY" } else { "TRAIN + SYNC" },
        if args.dry_run { " (dry run)" } else { "" }
    );

    let config = Config::load()?;
    log::info!("Configuration loaded successfully");
    log::info!(
        "Projection '{}', dimension {}, walk length {}, {} iterations",
        config.projection.graph_name,
        config.embedding.dimension,
        config.embedding.walk_length,
        config.embedding.iterations
    );

    let store = setup::connect_graph(&config).await?;
    let analytics = setup::analytics(&config, store.clone());
    let index: Arc<dyn VectorIndex> = if args.dry_run {
        Arc::new(MemoryIndex::new())
    } else {
        setup::pinecone_client(&config)?
    };

    let pipeline = Pipeline::from_config(&config, store, analytics, index)?;
    let report = match pipeline
        .run(RunOptions {
            skip_training: args.skip_training,
        })
        .await
    {
        Ok(report) => report,
        Err(e) => {
            log::error!("Embedding run failed ({:?} error): {}", e.category(), e);
            std::process::exit(1);
        }
    };

    println!("\n=== Embedding Run Summary ===");
    println!("Projected nodes:         {}", report.projected_nodes);
    println!("Projected relationships: {}", report.projected_relationships);
    println!("Persons embedded:        {}", report.embedded);
    println!("Records extracted:       {}", report.extracted);
    println!("Records skipped:         {}", report.skipped);
    println!("Vectors upserted:        {} in {} batches", report.upserted, report.batches);
    println!("Stale vectors removed:   {}", report.pruned);

    Ok(())
}
