use anyhow::Result;
use peermatch::graph::GraphStore;
use peermatch::index::{IndexSync, VectorIndex};
use peermatch::server::SimilarityServer;
use peermatch::{setup, Config, Pipeline, RunOptions};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("verify");

    let result = match command {
        "run" => run_pipeline().await,
        "similar" => {
            let email = args.get(2).ok_or_else(|| anyhow::anyhow!("Usage: peermatch similar <email> [k]"))?;
            let k = args.get(3).map(|k| k.parse::<usize>()).transpose()?;
            run_similar(email, k).await
        }
        "serve" => run_server().await,
        "verify" => run_verification().await,
        other => Err(anyhow::anyhow!(
            "Unknown command '{}'. Usage: peermatch [verify|run|similar <email> [k]|serve]",
            other
        )),
    };

    if let Err(e) = &result {
        log::error!("{:#}", e);
    }
    result
}

/// Project, train, extract and publish
async fn run_pipeline() -> Result<()> {
    let config = Config::load()?;
    let store = setup::connect_graph(&config).await?;
    let index: Arc<dyn VectorIndex> = setup::pinecone_client(&config)?;
    let analytics = setup::analytics(&config, store.clone());

    let pipeline = Pipeline::from_config(&config, store, analytics, index)?;
    let report = pipeline.run(RunOptions::default()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_similar(email: &str, k: Option<usize>) -> Result<()> {
    let config = Config::load()?;
    let store = setup::connect_graph(&config).await?;
    let index: Arc<dyn VectorIndex> = setup::pinecone_client(&config)?;
    let service = setup::similarity_service(&config, store, index).await?;

    let recommendation = service.recommend(email, k.unwrap_or(config.query.default_top_k)).await;
    println!("{}", serde_json::to_string_pretty(&recommendation)?);
    if let Some(error) = recommendation.error {
        anyhow::bail!("Similarity query failed: {}", error);
    }
    Ok(())
}

async fn run_server() -> Result<()> {
    log::info!("Starting Peermatch HTTP server v{}", env!("CARGO_PKG_VERSION"));
    let config = Config::load()?;
    let store = setup::connect_graph(&config).await?;
    let index: Arc<dyn VectorIndex> = setup::pinecone_client(&config)?;
    let service = setup::similarity_service(&config, store, index).await?;

    let server = SimilarityServer::new(
        Arc::new(service),
        config.query.default_top_k,
        config.server.allowed_origins.clone(),
    );
    server.run(config.server.port).await?;
    Ok(())
}

/// Check that the graph store and the vector index are reachable
async fn run_verification() -> Result<()> {
    log::info!("Starting Peermatch v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Configuration loaded successfully");
    log::info!("Graph store: {} (database '{}')", config.graph.uri, config.graph.database);
    log::info!("Embedding backend: {:?}, property '{}'", config.embedding.backend, config.embedding.property);

    let store = setup::connect_graph(&config).await?;
    store.verify().await?;
    log::info!("Graph store reachable");

    let index = setup::pinecone_client(&config)?;
    let sync = IndexSync::from_config(index.clone(), &config);
    let exists = index
        .list_indexes()
        .await?
        .iter()
        .any(|d| d.name == sync.spec().name);
    if exists {
        let handle = sync.resolve_handle().await?;
        log::info!("Index '{}' ready at {}", handle.name, handle.host);
    } else {
        log::warn!("Index '{}' does not exist yet; it is created on the first run", sync.spec().name);
    }

    Ok(())
}
