use anyhow::Result;
use clap::Parser;
use peermatch::index::VectorIndex;
use peermatch::{setup, Config};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "similar")]
#[command(about = "Find users most similar to a person")]
struct Args {
    /// Email of the query person
    email: String,

    /// Number of matches to return (defaults to query.default_top_k)
    #[arg(short = 'k', long)]
    top_k: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();
    let config = Config::load()?;
    let k = args.top_k.unwrap_or(config.query.default_top_k);

    let store = setup::connect_graph(&config).await?;
    let index: Arc<dyn VectorIndex> = setup::pinecone_client(&config)?;
    let service = setup::similarity_service(&config, store, index).await?;

    let start = Instant::now();
    let recommendation = service.recommend(&args.email, k).await;
    let elapsed = start.elapsed();

    if let Some(error) = &recommendation.error {
        eprintln!("Query failed: {}", error);
        std::process::exit(1);
    }

    println!("\nPeople most similar to {} (top {}):\n", recommendation.query, recommendation.top_k);
    if recommendation.matches.is_empty() {
        println!("  (no matches)");
    }
    for (i, person) in recommendation.matches.iter().enumerate() {
        println!("  {}. {}  score={:.4}", i + 1, person.email, person.score);
    }
    println!("\nQuery took {:?}", elapsed);

    Ok(())
}
