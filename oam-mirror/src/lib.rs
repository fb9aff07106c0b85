//! # oam-mirror
//!
//! Incremental, cloud-native mirror of the OpenAerialMap catalog, plus
//! quarterly contribution statistics.
//!
//! ## Overview
//!
//! Two independent pipelines share this crate:
//!
//! - **Catalog sync** ([`sync`]): fetches every catalog record, compares each
//!   record's last-modified timestamp with the fingerprints saved by the
//!   previous run, and republishes only what is new or changed: one JSON
//!   document per record, an aggregate GeoJSON feature collection and a
//!   PMTiles archive. A run with nothing to do performs no writes at all.
//! - **Statistics** ([`stats`]): scans contribution events from a database,
//!   buckets them by calendar quarter and computes per-quarter and cumulative
//!   metrics, including the true running count of distinct contributors.
//!
//! Artifacts land in any S3-compatible bucket through [`storage`] and are
//! meant to be served straight from a CDN.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oam_mirror::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let config = MirrorConfig::from_env()?;
//! let artifacts = Arc::new(ObjectStoreArtifacts::s3(config.require_store()?)?);
//!
//! let runner = SyncRunner::new(
//!     Arc::new(OamCatalogClient::new(DEFAULT_API_BASE)?),
//!     artifacts,
//!     Arc::new(Tippecanoe::new()),
//! );
//! let report = runner.run().await?;
//! println!("{}: {} new, {} changed", report.decision, report.new, report.changed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure model
//!
//! - Upstream fetch failures are retried with exponential backoff and abort
//!   the run once retries are exhausted.
//! - Malformed records are skipped and counted, never fatal.
//! - A fetch much smaller than the previous state aborts the run before any
//!   write instead of being read as mass deletion.
//! - Tile generation failures abort before publishing, leaving the previous
//!   artifacts in place.
//! - The state blob is written last, after every derived artifact.
//!
//! ## Feature Flags
//!
//! - `postgres` / `sqlite`: database backends for the statistics event
//!   source, via `datafusion-table-providers`.

pub mod catalog;
pub mod config;
pub mod error;
pub mod features;
pub mod logging;
pub mod prelude;
pub mod security;
pub mod stats;
pub mod storage;
pub mod sync;
pub mod tiles;
