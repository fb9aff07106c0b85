//! Prelude for commonly used types and traits in oam-mirror.

pub use crate::catalog::{CatalogRecord, OamCatalogClient, RecordSource, DEFAULT_API_BASE};
pub use crate::config::{MirrorConfig, StoreConfig};
pub use crate::error::{ErrorContext, MirrorError, Result};
pub use crate::logging::LogConfig;
pub use crate::stats::{AggregatorConfig, EventSource, StatsAggregator, StatsReport};
pub use crate::storage::{ArtifactStore, ObjectStoreArtifacts};
pub use crate::sync::{SyncDecision, SyncReport, SyncRunner, SyncState};
pub use crate::tiles::{TileBuilder, Tippecanoe};
