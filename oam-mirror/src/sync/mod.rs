//! Incremental catalog synchronization.
//!
//! A run compares every fetched record against the fingerprints persisted by
//! the previous run and republishes only what is new or changed. The whole
//! catalog is held in memory; at tens of thousands of records this is a few
//! hundred megabytes at most and keeps the differ a plain set comparison.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oam_mirror::catalog::{OamCatalogClient, DEFAULT_API_BASE};
//! use oam_mirror::storage::ObjectStoreArtifacts;
//! use oam_mirror::sync::SyncRunner;
//! use oam_mirror::tiles::Tippecanoe;
//!
//! # async fn example() -> oam_mirror::error::Result<()> {
//! let runner = SyncRunner::new(
//!     Arc::new(OamCatalogClient::new(DEFAULT_API_BASE)?),
//!     Arc::new(ObjectStoreArtifacts::in_memory()),
//!     Arc::new(Tippecanoe::new()),
//! );
//! let report = runner.run().await?;
//! println!("{} records, decision {}", report.records, report.decision);
//! # Ok(())
//! # }
//! ```

mod differ;
mod runner;
mod state;
mod state_store;

pub use differ::{
    DiffOutcome, PlanEntry, RecordStatus, ShrinkGuard, ShrinkReport, SyncDecision, SyncDiffer,
    SyncPlan,
};
pub use runner::{SyncReport, SyncRunner};
pub use state::SyncState;
pub use state_store::{BlobStateStore, StateStore};
