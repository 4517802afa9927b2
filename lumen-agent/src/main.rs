//! Lumen Agent
//!
//! Runs next to a photo editing host and applies staged edit jobs handed
//! out by a local coordination service.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: HTTP communication with the coordinator (jobs, messages)
//! - Host: File-backed catalog and preset folders the pipeline edits through
//! - Services: The pipeline engine
//! - Transport: Handshake, heartbeat and long-poll receive loop, with a
//!   dispatch registry for inbound messages
//! - Scheduler: Job polling and lifecycle management
//!
//! Jobs are polled on a fixed interval; when the push channel is up, a
//! `job_created` notification triggers an extra poll and progress is
//! streamed back as it happens.

mod clock;
mod config;
mod host;
mod repository;
mod scheduler;
mod service;
mod transport;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::clock::SystemClock;
use crate::config::Config;
use crate::host::{CatalogHost, DirectoryPresetRepository};
use crate::scheduler::{JobController, Outbox, job_notifications};
use crate::service::PipelineEngine;
use crate::transport::{DispatchRegistry, Transport, TransportSettings};
use lumen_client::CoordinatorClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lumen_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Lumen Agent");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: client_name={}, coordinator_url={}",
        config.client_name, config.coordinator_url
    );

    // Initialize coordinator client
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let client = Arc::new(CoordinatorClient::with_client(
        config.coordinator_url.clone(),
        http,
    ));

    info!("Coordinator client initialized");

    // Editing host
    let host = Arc::new(
        CatalogHost::open(&config.catalog_path)
            .with_context(|| format!("Failed to open catalog {}", config.catalog_path.display()))?,
    );
    if let Some(photo) = &config.selected_photo {
        host.import_photo(photo, None)
            .and_then(|_| host.select(photo))
            .with_context(|| format!("Failed to select photo {}", photo))?;
        info!("Selected photo {}", photo);
    }
    let presets = Arc::new(DirectoryPresetRepository::new(config.presets_dir.clone()));
    let engine = Arc::new(PipelineEngine::new(host, presets));

    // Push channel
    let registry = Arc::new(DispatchRegistry::new());
    let notifications = job_notifications(&registry);
    let transport = config.push_enabled.then(|| {
        Transport::new(
            client.clone(),
            registry.clone(),
            Arc::new(SystemClock),
            TransportSettings::from(&config),
        )
    });

    match &transport {
        Some(transport) => {
            transport.connect();
        }
        None => info!("Push channel disabled, polling only"),
    }

    let controller = Arc::new(JobController::new(
        client,
        engine,
        Outbox::new(transport.clone()),
        config.poll_interval,
    ));

    info!("Agent initialized successfully");
    info!(
        "Poll interval: {:?}, Heartbeat interval: {:?}",
        config.poll_interval, config.heartbeat_interval
    );

    tokio::select! {
        _ = controller.clone().run(notifications) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down ({})", controller.status_text());
        }
    }

    if let Some(transport) = transport {
        transport.disconnect().await;
    }

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(_) => {
            info!("Failed to load config from environment, using defaults");
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
