//! Masar Worker - Backend import service for the field-sales platform
//!
//! This worker connects to NATS and handles route-master import
//! messages from the frontend: mapping preview, confirmed imports
//! through a JetStream queue, cancellation and history.

mod cli;
mod config;
mod db;
mod handlers;
mod services;
mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::db::queries;
use crate::services::csv_ingest::parse_csv;
use crate::services::orchestrator::Orchestrator;
use crate::services::store::PgEntityStore;
use crate::services::{column_mapper, entity_extractor, row_transformer};
use crate::types::{HistoryLogEntry, ImportBatch, ImportResult, PerEntityCounts};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,masar_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let cli = cli::Cli::parse();

    info!("Starting Masar Worker...");

    // Load configuration
    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    // Connect to database
    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    // Run migrations
    db::run_migrations(&pool).await?;

    match cli.command {
        Some(cli::Command::Migrate) => {
            info!("Migrations finished, exiting");
            return Ok(());
        }
        Some(cli::Command::Import { file, company_id, uploader }) => {
            return run_file_import(&pool, &config, &file, company_id, uploader).await;
        }
        Some(cli::Command::Serve) | None => {}
    }

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    // Start message handlers
    let handler_result = handlers::start_handlers(nats_client, pool, &config).await;

    if let Err(e) = handler_result {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Operator-side import: run the whole pipeline against a local CSV
/// file without going through NATS. Mapping must auto-detect cleanly —
/// interactive mapping review belongs to the frontend.
async fn run_file_import(
    pool: &PgPool,
    config: &config::Config,
    file: &str,
    company_id: Uuid,
    uploader: Option<String>,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("could not read {}", file))?;
    let file_name = Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string());

    let (headers, rows) = parse_csv(&content)?;
    info!("Parsed {} rows from {}", rows.len(), file_name);

    let mapping = column_mapper::detect(&headers);
    let validation = column_mapper::validate(&mapping);
    if !validation.is_valid {
        anyhow::bail!(
            "could not auto-detect required columns: {:?}",
            validation.missing_required_fields
        );
    }

    let records = row_transformer::transform(&rows, &mapping);
    let entities = entity_extractor::extract(&records);
    info!(
        "Extracted {} branches, {} routes, {} customers, {} visits ({} missing GPS)",
        entities.branches.len(),
        entities.routes.len(),
        entities.customers.len(),
        entities.visits.len(),
        entities.stats.missing_gps_count
    );

    let mut batch = ImportBatch::new(company_id, file_name.clone(), rows.len());
    queries::import_batch::create(pool, &batch).await?;

    let store = Arc::new(PgEntityStore::new(pool.clone()));
    let orchestrator = Orchestrator::new(store).with_tuning(
        config.import_chunk_size,
        config.import_write_concurrency,
        config.import_max_write_retries,
    );

    let (progress_tx, mut progress_rx) =
        tokio::sync::mpsc::unbounded_channel::<crate::types::ProgressEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            info!(
                "{}: {}% ({}/{})",
                event.step_name, event.percent, event.current_count, event.total_count
            );
        }
    });

    let outcome = orchestrator
        .run(&mut batch, &rows, &entities, &progress_tx, &CancellationToken::new())
        .await;
    drop(progress_tx);
    let _ = printer.await;

    queries::import_batch::update_status(pool, batch.id, batch.status, batch.per_entity_counts)
        .await?;

    let result = match outcome {
        Ok(counts) => {
            let entry = HistoryLogEntry {
                id: Uuid::new_v4(),
                file_name,
                upload_date: chrono::Utc::now(),
                record_count: batch.raw_row_count,
                uploader,
                entry_type: "ROUTE".to_string(),
                stats: counts,
            };
            queries::history::append(pool, company_id, &entry).await?;
            ImportResult {
                success: true,
                per_entity_counts: counts,
                error: None,
            }
        }
        Err(e) => ImportResult {
            success: false,
            per_entity_counts: PerEntityCounts::default(),
            error: Some(e.to_string()),
        },
    };

    info!("Import finished: {}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        anyhow::bail!(result.error.unwrap_or_else(|| "import failed".to_string()));
    }
    Ok(())
}
