//! Data pipeline orchestrator - ingest extracts, build, export and push

use anyhow::{bail, Context, Result};
use gibct_data::config::Config;
use gibct_data::export;
use gibct_data::ingestion::types::{Delimiter, IngestStats};
use gibct_data::ingestion::{fetch, write};
use gibct_data::merge::{self, write::load_canonical};
use sqlx::PgPool;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: data-pipeline <ingest [dir] | build | export [path] | push | all [dir]>";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    info!("Starting data pipeline");

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };
    let arg = args.get(1).map(PathBuf::from);

    let db = gibct_data::db::connect(&config.database_url).await?;
    info!("Database connected");

    match command.as_str() {
        "ingest" => {
            run_ingest(&db, arg.as_deref().unwrap_or(&config.upload_dir)).await?;
        }
        "build" => {
            run_build(&db).await?;
        }
        "export" => {
            run_export(&db, arg.as_deref().unwrap_or(&config.export_path)).await?;
        }
        "push" => {
            run_push(&config, &db).await?;
        }
        "all" => {
            run_all(&config, &db, arg.as_deref().unwrap_or(&config.upload_dir)).await?;
        }
        other => {
            bail!("Unknown command: {}\n{}", other, USAGE);
        }
    }

    info!("Data pipeline complete");

    Ok(())
}

/// Ingest every `<source_type>.csv` in `dir`. A rejected file is reported and
/// the remaining files still run.
async fn run_ingest(db: &PgPool, dir: &Path) -> Result<usize> {
    info!("=== Ingest ===");

    let uploads = fetch::fetch_directory(dir).await?;
    if uploads.is_empty() {
        warn!("No source extracts found in {:?}", dir);
    }

    let mut failed = 0;
    let mut total = IngestStats::default();

    for upload in uploads {
        let source = upload.source_type;

        match write::ingest(db, upload, Delimiter::Comma).await {
            Ok(stats) => {
                info!("✓ {} completed: {}", source, stats);
                total.lines += stats.lines;
                total.inserted += stats.inserted;
            }
            Err(e) => {
                error!("✗ {} failed: {}", source, e);
                failed += 1;
            }
        }
    }

    info!("Ingest finished: {} rows staged, {} failures", total.inserted, failed);

    Ok(failed)
}

async fn run_build(db: &PgPool) -> Result<bool> {
    info!("=== Build ===");

    match merge::build(db).await.context("Build failed")? {
        Some(stats) => {
            for (step, matched) in &stats.steps {
                info!("  {}: {} matched", step, matched);
            }
            info!("✓ Build complete: {}", stats);
            Ok(true)
        }
        None => {
            warn!("Build skipped: upload every source type first");
            Ok(false)
        }
    }
}

async fn run_export(db: &PgPool, path: &Path) -> Result<()> {
    info!("=== Export ===");

    let table = load_canonical(db).await?;
    let csv = export::to_csv(&table)?;

    tokio::fs::write(path, &csv)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;

    info!("✓ Exported {} institutions to {:?}", table.len(), path);

    Ok(())
}

async fn run_push(config: &Config, db: &PgPool) -> Result<()> {
    info!("=== Push ===");

    let table = load_canonical(db).await?;
    if table.is_empty() {
        warn!("Canonical table is empty; nothing to push");
        return Ok(());
    }

    let stats = export::bulk_load(&config.target, &table).await?;
    info!("✓ Push complete: {}", stats);

    Ok(())
}

async fn run_all(config: &Config, db: &PgPool, dir: &Path) -> Result<()> {
    info!("Step 1/4: Ingesting extracts...");
    let failed = run_ingest(db, dir).await?;
    if failed > 0 {
        bail!("{} extracts were rejected; not building", failed);
    }

    info!("Step 2/4: Building canonical table...");
    if !run_build(db).await? {
        return Ok(());
    }

    info!("Step 3/4: Exporting CSV...");
    run_export(db, &config.export_path).await?;

    info!("Step 4/4: Pushing to target store...");
    run_push(config, db).await?;

    Ok(())
}
