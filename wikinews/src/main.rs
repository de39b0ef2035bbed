use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use searchy::ann::VectorIndexBuilder;
use searchy::{Index, IndexConfig};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, EnvFilter};

mod corpus;

#[derive(Parser)]
#[command(name = "wikinews")]
#[command(about = "Build, query and benchmark searchy indexes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index JSON/JSONL/text documents from a file or directory
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: PathBuf,
        /// Index directory, created if missing
        #[arg(long)]
        index: PathBuf,
        /// JSON index configuration
        #[arg(long)]
        config: Option<PathBuf>,
        /// Documents per flushed segment
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
    },
    /// Run a query and print ranked hits
    Query {
        #[arg(long)]
        index: PathBuf,
        #[arg(long)]
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Delete a document by its external id
    Delete {
        #[arg(long)]
        index: PathBuf,
        #[arg(long)]
        id: String,
    },
    /// Merge all segments into one
    Merge {
        #[arg(long)]
        index: PathBuf,
    },
    Stats {
        #[arg(long)]
        index: PathBuf,
    },
    /// Time in-memory ingestion and repeated queries
    Bench {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, required = true)]
        query: Vec<String>,
        #[arg(long, default_value_t = 100)]
        iterations: usize,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Build a vector index from fastText embeddings and query it with sampled rows
    Vectors {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long, default_value_t = 10)]
        num_trees: usize,
        #[arg(short, long, default_value_t = 3)]
        max_node_size: usize,
        #[arg(short = 'q', long, default_value_t = 3)]
        num_query_vectors: usize,
        #[arg(short = 'k', long, default_value_t = 3)]
        num_results: usize,
        #[arg(short = 'r', long)]
        max_records: Option<usize>,
        #[arg(short, long, default_value_t = false)]
        deduplicate: bool,
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, index, config, batch_size } => build(&input, &index, config.as_deref(), batch_size),
        Commands::Query { index, query, limit, timeout_ms } => {
            run_query(&index, &query, limit, timeout_ms.map(Duration::from_millis))
        }
        Commands::Delete { index, id } => {
            let idx = open_existing(&index)?;
            let doc_id = idx.delete_by_external_id(&id)?;
            idx.close()?;
            println!("deleted {id} (doc {doc_id})");
            Ok(())
        }
        Commands::Merge { index } => {
            let idx = open_existing(&index)?;
            let merged = idx.merge_all()?;
            idx.close()?;
            match merged {
                Some(id) => println!("merged into segment {id}"),
                None => println!("nothing to merge"),
            }
            Ok(())
        }
        Commands::Stats { index } => {
            let idx = open_existing(&index)?;
            let s = idx.stats();
            println!("segments:     {}", s.segments);
            println!("live docs:    {}", s.live_docs);
            println!("deleted docs: {}", s.deleted_docs);
            println!("terms:        {}", s.terms);
            Ok(())
        }
        Commands::Bench { input, query, iterations, config } => bench(&input, &query, iterations, config.as_deref()),
        Commands::Vectors {
            input,
            num_trees,
            max_node_size,
            num_query_vectors,
            num_results,
            max_records,
            deduplicate,
            seed,
        } => vectors(&input, num_trees, max_node_size, num_query_vectors, num_results, max_records, deduplicate, seed),
    }
}

fn load_config(path: Option<&Path>) -> Result<IndexConfig> {
    match path {
        Some(p) => IndexConfig::from_file(p).with_context(|| format!("reading config {}", p.display())),
        None => Ok(IndexConfig::default()),
    }
}

fn open_existing(path: &Path) -> Result<Index> {
    Index::open_existing(path).with_context(|| format!("opening index {}", path.display()))
}

fn build(input: &Path, index_dir: &Path, config: Option<&Path>, batch_size: usize) -> Result<()> {
    let started = Instant::now();
    let index = if index_dir.join("manifest.json").is_file() {
        if config.is_some() {
            tracing::warn!(index = %index_dir.display(), "index exists; --config is ignored in favour of its stored config");
        }
        open_existing(index_dir)?
    } else {
        Index::open(index_dir, load_config(config)?)?
    };
    let batch_size = batch_size.max(1);

    let mut pending = 0usize;
    let mut total = 0usize;
    for file in corpus::files(input)? {
        let n = corpus::read_file(&file, &mut |doc| {
            index.update_document(&doc.id, &doc.text())?;
            pending += 1;
            if pending >= batch_size {
                index.flush()?;
                pending = 0;
            }
            Ok(())
        })?;
        tracing::debug!(file = %file.display(), docs = n, "read corpus file");
        total += n;
    }
    index.commit()?;
    let stats = index.stats();
    tracing::info!(docs = total, segments = stats.segments, terms = stats.terms, "index build complete");
    println!("indexed {total} documents into {} in {:?}", index_dir.display(), started.elapsed());
    Ok(())
}

fn run_query(index_dir: &Path, query: &str, limit: Option<usize>, timeout: Option<Duration>) -> Result<()> {
    let index = open_existing(index_dir)?;
    let limit = limit.unwrap_or(index.config().query.max_results);
    let started = Instant::now();
    let hits = index.search(query, limit, timeout)?;
    for (rank, hit) in hits.iter().enumerate() {
        println!("{:>4}  {:>8.4}  {}", rank + 1, hit.score, hit.external_id);
    }
    println!("{} hits in {:?}", hits.len(), started.elapsed());
    Ok(())
}

fn bench(input: &Path, queries: &[String], iterations: usize, config: Option<&Path>) -> Result<()> {
    let index = Index::in_memory(load_config(config)?);
    let mut docs = Vec::new();
    for file in corpus::files(input)? {
        corpus::read_file(&file, &mut |doc| {
            docs.push((doc.id.clone(), doc.text()));
            Ok(())
        })?;
    }

    let started = Instant::now();
    index.ingest(docs.iter().map(|(id, text)| (id.as_str(), text.as_str())))?;
    index.commit()?;
    let ingest = started.elapsed();
    println!("ingested {} documents in {:?} ({:.0} docs/s)", docs.len(), ingest, docs.len() as f64 / ingest.as_secs_f64().max(1e-9));

    let iterations = iterations.max(1);
    for q in queries {
        let started = Instant::now();
        let mut hits = 0;
        for _ in 0..iterations {
            hits = index.search(q, index.config().query.max_results, None)?.len();
        }
        let per_query = started.elapsed() / iterations as u32;
        println!("{q:?}: {hits} hits, {per_query:?} per query over {iterations} runs");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn vectors(
    input: &Path,
    num_trees: usize,
    max_node_size: usize,
    num_query_vectors: usize,
    num_results: usize,
    max_records: Option<usize>,
    deduplicate: bool,
    seed: Option<u64>,
) -> Result<()> {
    let data = corpus::read_vec_file(input, max_records)?;
    println!("read {} vectors", data.vectors.len());
    if data.vectors.is_empty() {
        bail!("no vectors in {}", input.display());
    }

    let started = Instant::now();
    let mut builder = VectorIndexBuilder::new().num_trees(num_trees).max_leaf_size(max_node_size).deduplicate(deduplicate);
    if let Some(s) = seed {
        builder = builder.seed(s);
    }
    builder.add_all(data.vectors.clone(), (0..data.vectors.len() as u64).collect())?;
    let index = builder.build()?;
    println!(
        "built index with {num_trees} trees and max node size {max_node_size} in {:?}",
        started.elapsed()
    );

    // sampled with repetition; query vectors are never deduplicated
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    };
    let queries: Vec<Vec<f32>> = (0..num_query_vectors)
        .map(|_| data.vectors[rng.random_range(0..data.vectors.len())].clone())
        .collect();

    let started = Instant::now();
    let results = index.query_many(&queries, num_results)?;
    println!("queried index in {:?}", started.elapsed());
    for c in results {
        println!("{} {} {}", data.words[c.id as usize], c.id, c.distance);
    }
    Ok(())
}
