use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use listing_batch::config;
use listing_batch::db;
use listing_batch::model::{NewBatch, ProductInput};
use listing_batch::processor::ProcessOptions;
use listing_batch::publisher::{DryRunPublisher, HttpPublisher, Publisher};
use listing_batch::BatchEngine;

#[derive(Debug, Parser)]
#[command(author, version, about = "Publish product listings to marketplaces in batches")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Accept every listing locally instead of calling the listings gateway
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a batch from a products file (YAML or JSON list)
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "local")]
        owner: String,
        #[arg(long)]
        products: PathBuf,
        /// Target marketplace id; repeat for several
        #[arg(long = "marketplace", required = true)]
        marketplaces: Vec<String>,
        /// Process the batch right after creating it
        #[arg(long)]
        process: bool,
    },
    /// Publish every pending item of a batch
    Process { batch_id: i64 },
    /// Retry failed items (all of them unless --item is given)
    Retry {
        batch_id: i64,
        #[arg(long = "item")]
        items: Vec<i64>,
    },
    /// Delete a batch and its items
    Delete { batch_id: i64 },
    /// Show a batch with its items and live counts
    Show { batch_id: i64 },
    /// List recent batches
    List {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value = "20", value_parser = clap::value_parser!(i64).range(1..))]
        limit: i64,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let publisher: Arc<dyn Publisher> = if args.dry_run {
        Arc::new(DryRunPublisher)
    } else {
        Arc::new(HttpPublisher::from_config(&cfg)?)
    };
    let engine = BatchEngine::new(pool, publisher, ProcessOptions::from(&cfg.processing));

    match args.command {
        Command::Create {
            name,
            owner,
            products,
            marketplaces,
            process,
        } => {
            let content = std::fs::read_to_string(&products)
                .with_context(|| format!("failed to read {}", products.display()))?;
            let products: Vec<ProductInput> = serde_yaml::from_str(&content)
                .with_context(|| format!("invalid products file {}", products.display()))?;
            let req = NewBatch {
                name,
                owner,
                products,
                marketplaces,
            };
            let mut batch = engine.create_batch(&req).await?;
            if process {
                batch = engine.process_batch(batch.id).await?;
            }
            print_json(&batch)?;
        }
        Command::Process { batch_id } => {
            let batch = engine.process_batch(batch_id).await?;
            print_json(&batch)?;
        }
        Command::Retry { batch_id, items } => {
            let ids = (!items.is_empty()).then_some(items.as_slice());
            let batch = engine.retry_items(batch_id, ids).await?;
            print_json(&batch)?;
        }
        Command::Delete { batch_id } => {
            engine.delete_batch(batch_id).await?;
            info!(batch_id, "deleted");
        }
        Command::Show { batch_id } => {
            let progress = engine.batch_progress(batch_id).await?;
            let items = engine.batch_items(batch_id).await?;
            print_json(&serde_json::json!({
                "batch": progress.batch,
                "counts": progress.counts,
                "items": items,
            }))?;
        }
        Command::List { owner, limit } => {
            let batches = engine.list_batches(owner.as_deref(), limit).await?;
            print_json(&batches)?;
        }
    }

    Ok(())
}
