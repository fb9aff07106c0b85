//! Persistence of the sync state between runs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::state::SyncState;
use crate::error::{MirrorError, Result};
use crate::storage::{ArtifactStore, CONTENT_TYPE_JSON, STATE_KEY};

/// Loads and saves the [`SyncState`].
///
/// Exactly one run owns the state at a time; implementations need not guard
/// against concurrent writers.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the last persisted state, or an empty state if none exists.
    async fn load(&self) -> Result<SyncState>;

    /// Replaces the persisted state.
    async fn save(&self, state: &SyncState) -> Result<()>;
}

/// [`StateStore`] keeping the state as one JSON blob in an [`ArtifactStore`].
#[derive(Debug, Clone)]
pub struct BlobStateStore {
    store: Arc<dyn ArtifactStore>,
    key: String,
}

impl BlobStateStore {
    /// Stores the state at the default `state.json` key.
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            key: STATE_KEY.to_string(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl StateStore for BlobStateStore {
    #[instrument(skip(self), fields(key = %self.key))]
    async fn load(&self) -> Result<SyncState> {
        let Some(bytes) = self.store.get(&self.key).await? else {
            debug!("No previous state found");
            return Ok(SyncState::new());
        };

        let state = SyncState::from_slice(&bytes).map_err(|e| {
            MirrorError::Serialization(format!("Unreadable sync state at '{}': {e}", self.key))
        })?;
        info!(records = state.len(), "Loaded sync state");
        Ok(state)
    }

    #[instrument(skip(self, state), fields(key = %self.key, records = state.len()))]
    async fn save(&self, state: &SyncState) -> Result<()> {
        let body = state.to_vec()?;
        self.store.put(&self.key, body, CONTENT_TYPE_JSON).await?;
        info!("Saved sync state");
        Ok(())
    }
}
