//! Runs one incremental catalog sync against the configured bucket.

use std::process::ExitCode;
use std::sync::Arc;

use oam_mirror::catalog::{OamCatalogClient, DEFAULT_API_BASE};
use oam_mirror::config::MirrorConfig;
use oam_mirror::error::{ErrorContext, Result};
use oam_mirror::logging::setup::{init_logging, LoggingConfig};
use oam_mirror::storage::ObjectStoreArtifacts;
use oam_mirror::sync::{SyncReport, SyncRunner};
use oam_mirror::tiles::Tippecanoe;
use tracing::{error, info};

async fn run() -> Result<SyncReport> {
    let config = MirrorConfig::from_env()?;
    let artifacts = ObjectStoreArtifacts::s3(config.require_store()?)?;
    info!(store = %artifacts.description(), "Starting catalog sync");

    let client = OamCatalogClient::new(DEFAULT_API_BASE).context("Failed to create catalog client")?;
    SyncRunner::new(Arc::new(client), Arc::new(artifacts), Arc::new(Tippecanoe::new()))
        .run()
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_logging(LoggingConfig::default()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match run().await {
        Ok(report) => {
            println!("Decision:     {}", report.decision);
            println!("Fetched:      {}", report.fetched);
            println!("New:          {}", report.new);
            println!("Changed:      {}", report.changed);
            println!("Removed:      {}", report.removed);
            println!("Skipped:      {}", report.skipped);
            println!("Features:     {} ({} without geometry)", report.features, report.non_spatial);
            println!("Writes:       {}", report.writes);
            println!("Duration:     {:.1}s", report.duration.as_secs_f64());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, pre_publish = e.is_pre_publish(), "Catalog sync failed");
            ExitCode::FAILURE
        }
    }
}
