use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{info, instrument, warn};

use super::differ::{DiffOutcome, RecordStatus, SyncDecision, SyncDiffer, SyncPlan};
use super::state_store::{BlobStateStore, StateStore};
use crate::catalog::RecordSource;
use crate::error::{MirrorError, Result};
use crate::features::FeatureBuilder;
use crate::storage::{
    record_key, ArtifactStore, CONTENT_TYPE_GEOJSON, CONTENT_TYPE_JSON, CONTENT_TYPE_PMTILES,
    FEATURE_COLLECTION_KEY, TILE_ARCHIVE_KEY,
};
use crate::tiles::TileBuilder;

const DEFAULT_PUBLISH_CONCURRENCY: usize = 16;

/// Summary of one sync run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub decision: SyncDecision,
    pub fetched: usize,
    pub records: usize,
    pub new: usize,
    pub changed: usize,
    pub removed: usize,
    pub skipped: usize,
    /// Records left out of the feature collection for lack of valid geometry.
    pub non_spatial: usize,
    pub features: usize,
    /// Number of blob writes performed, state included.
    pub writes: usize,
    pub duration: Duration,
}

impl SyncReport {
    fn from_plan(plan: &SyncPlan, fetched: usize) -> Self {
        Self {
            decision: plan.decision,
            fetched,
            records: plan.entries.len(),
            new: plan.count(RecordStatus::New),
            changed: plan.count(RecordStatus::Changed),
            removed: plan.removed.len(),
            skipped: plan.skipped.len(),
            non_spatial: 0,
            features: 0,
            writes: 0,
            duration: Duration::ZERO,
        }
    }
}

/// Everything a run publishes, computed up front.
struct PreparedArtifacts {
    records: Vec<(String, Vec<u8>)>,
    collection: Vec<u8>,
    tiles: Vec<u8>,
}

/// One end-to-end catalog sync.
///
/// Order: load state, fetch, diff, then (unless nothing changed) build the
/// feature collection and tile archive, and only then publish. The state blob
/// is written last so an interrupted publish is redone by the next run.
pub struct SyncRunner {
    source: Arc<dyn RecordSource>,
    artifacts: Arc<dyn ArtifactStore>,
    state_store: Arc<dyn StateStore>,
    tiles: Arc<dyn TileBuilder>,
    differ: SyncDiffer,
    features: FeatureBuilder,
    publish_concurrency: usize,
}

impl SyncRunner {
    /// Creates a runner that keeps its state in `artifacts` under `state.json`.
    pub fn new(
        source: Arc<dyn RecordSource>,
        artifacts: Arc<dyn ArtifactStore>,
        tiles: Arc<dyn TileBuilder>,
    ) -> Self {
        Self {
            state_store: Arc::new(BlobStateStore::new(artifacts.clone())),
            source,
            artifacts,
            tiles,
            differ: SyncDiffer::default(),
            features: FeatureBuilder::default(),
            publish_concurrency: DEFAULT_PUBLISH_CONCURRENCY,
        }
    }

    pub fn with_state_store(mut self, state_store: Arc<dyn StateStore>) -> Self {
        self.state_store = state_store;
        self
    }

    pub fn with_differ(mut self, differ: SyncDiffer) -> Self {
        self.differ = differ;
        self
    }

    /// Set how many per-record documents are uploaded at once.
    pub fn with_publish_concurrency(mut self, concurrency: usize) -> Self {
        self.publish_concurrency = concurrency.max(1);
        self
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<SyncReport> {
        let started = Instant::now();

        let previous = self.state_store.load().await?;
        let fetched = self.source.fetch_all().await?;
        let fetched_count = fetched.len();

        let plan = match self.differ.diff(fetched, &previous) {
            DiffOutcome::Proceed(plan) => plan,
            DiffOutcome::SuspiciousShrink(report) => {
                return Err(MirrorError::InvariantViolation(format!(
                    "refusing to publish: {report}"
                )));
            }
        };

        let mut report = SyncReport::from_plan(&plan, fetched_count);
        if plan.decision == SyncDecision::NoOp {
            report.duration = started.elapsed();
            info!(records = report.records, "No changes; nothing to publish");
            return Ok(report);
        }

        let prepared = self.prepare(&plan, &mut report).await?;
        report.writes = self.publish(prepared).await?;

        self.state_store.save(&plan.next_state).await?;
        report.writes += 1;
        report.duration = started.elapsed();

        info!(
            decision = %report.decision,
            new = report.new,
            changed = report.changed,
            features = report.features,
            writes = report.writes,
            "Sync complete"
        );
        Ok(report)
    }

    /// Builds every artifact in memory. Nothing is written here.
    async fn prepare(&self, plan: &SyncPlan, report: &mut SyncReport) -> Result<PreparedArtifacts> {
        let records = plan
            .republish()
            .map(|entry| {
                let body = serde_json::to_vec_pretty(entry.record.document())?;
                Ok((record_key(entry.record.id()), body))
            })
            .collect::<Result<Vec<_>>>()?;

        let build = self.features.build_collection(plan.records());
        if !build.non_spatial.is_empty() {
            warn!(
                non_spatial = build.non_spatial.len(),
                "Records without usable geometry left out of spatial output"
            );
        }
        report.features = build.len();
        report.non_spatial = build.non_spatial.len();

        let collection = build.to_bytes()?;
        let tiles = self.tiles.build(&collection).await?;

        Ok(PreparedArtifacts {
            records,
            collection,
            tiles,
        })
    }

    #[instrument(skip_all, fields(records = prepared.records.len()))]
    async fn publish(&self, prepared: PreparedArtifacts) -> Result<usize> {
        let record_writes = prepared.records.len();
        stream::iter(prepared.records)
            .map(|(key, body)| async move {
                self.artifacts.put(&key, body, CONTENT_TYPE_JSON).await
            })
            .buffer_unordered(self.publish_concurrency)
            .try_collect::<Vec<()>>()
            .await?;

        self.artifacts
            .put(FEATURE_COLLECTION_KEY, prepared.collection, CONTENT_TYPE_GEOJSON)
            .await?;
        self.artifacts
            .put(TILE_ARCHIVE_KEY, prepared.tiles, CONTENT_TYPE_PMTILES)
            .await?;

        Ok(record_writes + 2)
    }
}
