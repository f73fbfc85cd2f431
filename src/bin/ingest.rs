use std::{fs::File, io::BufReader, path::PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use support_graph::{
    config,
    embedding::build_embedding_client,
    ingest::{DatasetFormat, Indexer, load_dataset},
    logging,
    qdrant::QdrantService,
};

#[derive(Parser)]
#[command(
    name = "support-graph-ingest",
    about = "Embed a question/answer export and load it into the support index"
)]
struct Cli {
    /// CSV (`.csv`) or JSON Lines export with `instruction`/`response` (or `question`/`answer`)
    /// fields.
    #[arg(long)]
    input: PathBuf,
    /// Target collection (defaults to `QDRANT_COLLECTION_NAME`).
    #[arg(long)]
    collection: Option<String>,
    /// Records embedded per request.
    #[arg(long, default_value_t = 64)]
    batch_size: usize,
    /// Index at most this many records.
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    let file = File::open(&cli.input)
        .with_context(|| format!("failed to open dataset at {}", cli.input.display()))?;
    let format = DatasetFormat::from_path(&cli.input);
    let (mut records, report) =
        load_dataset(BufReader::new(file), format).context("failed to load dataset")?;
    tracing::info!(
        format = ?format,
        rows = report.rows,
        dropped_incomplete = report.dropped_incomplete,
        duplicates = report.duplicates,
        records = records.len(),
        "Dataset loaded"
    );
    if let Some(limit) = cli.limit {
        records.truncate(limit);
    }
    if records.is_empty() {
        bail!("no complete records found in {}", cli.input.display());
    }

    let collection = cli
        .collection
        .unwrap_or_else(|| config.qdrant_collection_name.clone());
    let embedding = build_embedding_client(config).context("failed to build embedding client")?;
    let qdrant = QdrantService::new(config).context("failed to build Qdrant client")?;
    let indexer = Indexer::new(
        embedding,
        qdrant,
        collection.clone(),
        config.embedding_dimension,
        cli.batch_size,
    );

    let written = indexer.index(&records).await.context("indexing failed")?;
    tracing::info!(collection = %collection, written, "Index build complete");
    println!("Indexed {written} records into '{collection}'");
    Ok(())
}
