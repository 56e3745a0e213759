use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use stylemem::constants::{AGGREGATE_SUFFIX, DEFAULT_THRESHOLD_DAYS, LLAMA_MODEL_ENV};
use stylemem::{Config, ConsolidationConfig, DEFAULT_MODEL_ID, StyleMemory};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stylemem")]
#[command(about = "Search and consolidate a personal style memory")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base directory holding `memory/` and `indices/`.
    #[arg(short, long, default_value = ".")]
    path: PathBuf,

    /// HuggingFace model ID for the model2vec embedding model.
    #[arg(short, long, default_value = DEFAULT_MODEL_ID)]
    model: String,

    /// Use the hash embedding instead of loading a model.
    #[arg(long)]
    no_model: bool,

    /// Always use the brute-force search path.
    #[arg(long)]
    brute_force: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index from the record directory.
    Build {},
    /// Records most relevant to a query.
    Query {
        query: String,

        #[arg(short, long, default_value = "5")]
        k: usize,

        /// Only records sharing one of these tags (repeatable).
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Include distances and index positions.
        #[arg(long)]
        scores: bool,
    },
    /// Most recently dated indexed records.
    Recent {
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// Fold old records into one aggregate record.
    Consolidate {
        #[arg(long, default_value_t = DEFAULT_THRESHOLD_DAYS)]
        threshold_days: i64,

        /// Local GGUF model used to write the summary.
        #[arg(long, env = LLAMA_MODEL_ENV)]
        llama_model: Option<PathBuf>,
    },
    /// Aggregate records, newest first.
    Summaries {
        /// Print only the latest aggregate.
        #[arg(long)]
        latest: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config {
        model_id: (!cli.no_model).then_some(cli.model),
        accelerated_search: !cli.brute_force,
        ..Config::new(&cli.path)
    };
    if let Commands::Consolidate {
        threshold_days,
        ref llama_model,
    } = cli.command
    {
        config.consolidation = ConsolidationConfig {
            threshold_days,
            model_path: llama_model.clone(),
        };
    }

    let mut memory = StyleMemory::open(config)
        .with_context(|| format!("failed to open memory at {}", cli.path.display()))?;

    match cli.command {
        Commands::Build {} => {
            let stats = memory.build_index()?;
            print_json(&stats)?;
        }
        Commands::Query {
            query,
            k,
            tags,
            scores,
        } => {
            let filter = (!tags.is_empty()).then_some(tags.as_slice());
            if scores {
                print_json(&memory.search(&query, k, filter))?;
            } else {
                print_json(&memory.get_relevant(&query, k, filter))?;
            }
        }
        Commands::Recent { limit } => {
            print_json(&memory.recent(limit))?;
        }
        Commands::Consolidate { .. } => {
            let report = memory.consolidate()?;
            if report.aggregate.is_none() {
                eprintln!("Nothing to consolidate");
            }
            print_json(&report)?;
        }
        Commands::Summaries { latest } => {
            if latest {
                let aggregate = memory.latest_aggregate(AGGREGATE_SUFFIX)?;
                print_json(&aggregate)?;
            } else {
                print_json(&memory.aggregates()?)?;
            }
        }
    }

    Ok(())
}
