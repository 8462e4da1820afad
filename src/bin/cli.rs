use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use hybridrec::config::StorageBackend;
use hybridrec::services::events::MemoryEventStore;
use hybridrec::services::store::{MemoryStore, RatingSource};
use hybridrec::utils::metrics::{evaluate_holdout, HoldoutOptions};
use hybridrec::utils::synthetic_ratings;
use hybridrec::{init_tracing, AppState, Config, Item, RaterId};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Offline tools for the hybridrec engine", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    synthetic: SyntheticArgs,

    #[command(subcommand)]
    command: Command,
}

/// Seeds an in-memory store with generated ratings instead of reading the configured backend.
#[derive(ClapArgs, Debug)]
struct SyntheticArgs {
    #[arg(long, global = true)]
    synthetic: bool,

    #[arg(long, global = true, default_value_t = 200)]
    raters: usize,

    #[arg(long, global = true, default_value_t = 100)]
    items: usize,

    #[arg(long, global = true, default_value_t = 0.1)]
    density: f64,

    #[arg(long, global = true, default_value_t = 42)]
    seed: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Most similar raters
    Neighbors {
        rater_id: RaterId,
        #[arg(short, default_value_t = 5)]
        k: usize,
    },
    /// Collaborative recommendations
    Recommend {
        rater_id: RaterId,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
        #[arg(long, default_value_t = 3.5)]
        min_score: f32,
    },
    /// Hybrid recommendations
    Hybrid {
        rater_id: RaterId,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Leave-latest-out evaluation over all approved ratings
    Evaluate {
        #[arg(long, default_value_t = 5)]
        top_n: usize,
        #[arg(long, default_value_t = 4)]
        relevance_threshold: u8,
    },
    /// Delete event records older than the retention window
    PurgeEvents {
        #[arg(long)]
        days: Option<i64>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build_state(config: Config, synthetic: &SyntheticArgs) -> Result<AppState> {
    if !synthetic.synthetic {
        return AppState::new(config).await;
    }

    let ratings = synthetic_ratings(synthetic.raters, synthetic.items, synthetic.density, synthetic.seed);
    let catalog = (1..=synthetic.items as i64)
        .map(|id| Item::new(id, format!("item-{}", id), format!("category-{}", id % 3)))
        .collect();
    info!(ratings = ratings.len(), "Seeded synthetic ratings");

    Ok(AppState::from_parts(
        config,
        Arc::new(MemoryStore::with_data(ratings, catalog, Vec::new())),
        Arc::new(MemoryEventStore::new()),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    let config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::from_env()?
    };

    if config.storage.backend == StorageBackend::Memory && !args.synthetic.synthetic {
        info!("Memory backend without --synthetic starts empty; results will be empty");
    }

    let state = build_state(config, &args.synthetic).await?;
    let service = &state.recommendation_service;

    match args.command {
        Command::Neighbors { rater_id, k } => {
            print_json(&service.find_neighbors(rater_id, k).await?)?;
        }
        Command::Recommend { rater_id, limit, min_score } => {
            print_json(&service.recommend_collaborative(rater_id, limit, min_score).await?)?;
        }
        Command::Hybrid { rater_id, limit } => {
            print_json(&service.recommend_hybrid(rater_id, limit).await?)?;
        }
        Command::Evaluate { top_n, relevance_threshold } => {
            let ratings = state.store.approved_ratings().await?;
            let options = HoldoutOptions {
                k_neighbors: state.config.recommendation.k_neighbors,
                min_co_rated: state.config.recommendation.min_co_rated,
                top_n,
                min_score: state.config.recommendation.min_predicted_rating,
                relevance_threshold,
            };
            let report = tokio::task::spawn_blocking(move || evaluate_holdout(&ratings, options)).await??;
            print_json(&report)?;
        }
        Command::PurgeEvents { days } => {
            let removed = state.events.purge_older_than(days).await?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
    }

    Ok(())
}
