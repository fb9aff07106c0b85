//! Computes quarterly contribution statistics and publishes them.

use std::process::ExitCode;
use std::sync::Arc;

use datafusion::prelude::SessionContext;
use oam_mirror::config::MirrorConfig;
use oam_mirror::error::Result;
use oam_mirror::logging::setup::{init_logging, LoggingConfig};
use oam_mirror::stats::{
    publish_stats, AggregatorConfig, CsvFormatter, EventSource, HumanFormatter, JsonFormatter,
    ReportFormatter, SqlEventSource, StatsAggregator,
};
use oam_mirror::storage::{ObjectStoreArtifacts, STATS_CSV_KEY, STATS_JSON_KEY};
use tracing::{error, info, warn};

#[cfg(any(feature = "postgres", feature = "sqlite"))]
async fn register_events_table(ctx: &SessionContext, config: &MirrorConfig) -> Result<()> {
    use oam_mirror::stats::{DatabaseConfig, DatabaseSource, DEFAULT_EVENTS_TABLE};

    let url = config.require_database_url()?;
    info!(
        database = %config.database_description().unwrap_or_default(),
        "Connecting to database"
    );
    DatabaseSource::new(DatabaseConfig::from_url(url)?, DEFAULT_EVENTS_TABLE)
        .register(ctx)
        .await
}

#[cfg(not(any(feature = "postgres", feature = "sqlite")))]
async fn register_events_table(_ctx: &SessionContext, config: &MirrorConfig) -> Result<()> {
    config.require_database_url()?;
    Err(oam_mirror::error::MirrorError::Configuration(
        "built without database support; enable the `postgres` or `sqlite` feature".to_string(),
    ))
}

async fn run() -> Result<()> {
    let config = MirrorConfig::from_env()?;

    let ctx = Arc::new(SessionContext::new());
    register_events_table(&ctx, &config).await?;
    let events = SqlEventSource::new(ctx).events().await?;

    let aggregator =
        StatsAggregator::new(AggregatorConfig::default().with_tracking_start(config.tracking_start));
    let report = aggregator.aggregate(events);

    println!("{}", HumanFormatter.render(&report)?);

    tokio::fs::write(STATS_JSON_KEY, JsonFormatter::new().format(&report)?).await?;
    tokio::fs::write(STATS_CSV_KEY, CsvFormatter.format(&report)?).await?;

    match config.require_store() {
        Ok(store) => {
            let artifacts = ObjectStoreArtifacts::s3(store)?;
            publish_stats(&artifacts, &report).await?;
            info!(store = %artifacts.description(), "Statistics uploaded");
        }
        Err(e) => warn!(reason = %e, "Blob store not configured, skipping upload"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_logging(LoggingConfig::default()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Statistics run failed");
            ExitCode::FAILURE
        }
    }
}
