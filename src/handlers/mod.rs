//! NATS message handlers

pub mod import;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use sqlx::PgPool;
use tokio::select;
use tracing::{error, info};

use crate::config::Config;
use crate::services::import_processor::RouteImportProcessor;

/// Start all message handlers
pub async fn start_handlers(client: Client, pool: PgPool, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    // Subscribe to all subjects
    let preview_sub = client.subscribe("masar.import.route.preview").await?;
    let submit_sub = client.subscribe("masar.import.route.submit").await?;
    let cancel_sub = client.subscribe("masar.import.route.cancel").await?;
    let history_sub = client.subscribe("masar.import.history.list").await?;

    info!("Subscribed to NATS subjects");

    let processor = Arc::new(RouteImportProcessor::new(client.clone(), pool.clone(), config).await?);

    // Preview is pure computation — no pool, no processor
    let client_preview = client.clone();
    let preview_handle = tokio::spawn(async move {
        import::handle_preview(client_preview, preview_sub).await
    });

    let client_submit = client.clone();
    let processor_submit = Arc::clone(&processor);
    let submit_handle = tokio::spawn(async move {
        import::handle_submit(client_submit, submit_sub, processor_submit).await
    });

    let client_cancel = client.clone();
    let cancel_handle = tokio::spawn(async move {
        import::handle_cancel(client_cancel, cancel_sub).await
    });

    let client_history = client.clone();
    let pool_history = pool.clone();
    let history_handle = tokio::spawn(async move {
        import::handle_history(client_history, history_sub, pool_history).await
    });

    // Start the job processor
    let processor_main = Arc::clone(&processor);
    tokio::spawn(async move {
        if let Err(e) = processor_main.start_processing().await {
            error!("Route import processor error: {}", e);
        }
    });

    info!("All handlers started, waiting for messages...");

    // Wait for any handler to finish (which means an error occurred)
    select! {
        result = preview_handle => {
            error!("Preview handler finished: {:?}", result);
        }
        result = submit_handle => {
            error!("Submit handler finished: {:?}", result);
        }
        result = cancel_handle => {
            error!("Cancel handler finished: {:?}", result);
        }
        result = history_handle => {
            error!("History handler finished: {:?}", result);
        }
    }

    Ok(())
}
