//! End-to-end sync runs against in-memory collaborators.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use oam_mirror::catalog::RecordSource;
use oam_mirror::error::{MirrorError, Result};
use oam_mirror::storage::{
    record_key, ArtifactStore, ObjectStoreArtifacts, FEATURE_COLLECTION_KEY, STATE_KEY,
    TILE_ARCHIVE_KEY,
};
use oam_mirror::sync::{
    BlobStateStore, ShrinkGuard, StateStore, SyncDecision, SyncDiffer, SyncRunner, SyncState,
};
use oam_mirror::tiles::TileBuilder;
use serde_json::{json, Value};

/// Store that records every write in order.
#[derive(Debug)]
struct RecordingStore {
    inner: ObjectStoreArtifacts,
    writes: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl RecordingStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: ObjectStoreArtifacts::in_memory(),
            writes: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
        })
    }

    fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    fn fail_on(&self, key: Option<&str>) {
        *self.fail_on.lock().unwrap() = key.map(str::to_string);
    }

    async fn json(&self, key: &str) -> Option<Value> {
        self.inner
            .get(key)
            .await
            .unwrap()
            .map(|bytes| serde_json::from_slice(&bytes).unwrap())
    }
}

#[async_trait]
impl ArtifactStore for RecordingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        if self.fail_on.lock().unwrap().as_deref() == Some(key) {
            return Err(MirrorError::storage("put", key, "injected failure"));
        }
        self.writes.lock().unwrap().push(key.to_string());
        self.inner.put(key, body, content_type).await
    }
}

/// Source returning whatever catalog is currently set.
struct StaticSource {
    records: Mutex<Vec<Value>>,
}

impl StaticSource {
    fn new(records: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records),
        })
    }

    fn set(&self, records: Vec<Value>) {
        *self.records.lock().unwrap() = records;
    }
}

#[async_trait]
impl RecordSource for StaticSource {
    async fn fetch_all(&self) -> Result<Vec<Value>> {
        Ok(self.records.lock().unwrap().clone())
    }
}

/// Tile builder producing a small marker archive, or failing on demand.
struct FakeTiles {
    fail: bool,
}

#[async_trait]
impl TileBuilder for FakeTiles {
    async fn build(&self, collection: &[u8]) -> Result<Vec<u8>> {
        if self.fail {
            return Err(MirrorError::tile_build("tippecanoe exited with status 1"));
        }
        let features = serde_json::from_slice::<Value>(collection)?["features"]
            .as_array()
            .map_or(0, Vec::len);
        Ok(format!("PMTILES:{features}").into_bytes())
    }
}

fn image(id: &str, uploaded_at: &str) -> Value {
    json!({
        "_id": id,
        "uploaded_at": uploaded_at,
        "title": format!("Image {id}"),
        "platform": "uav",
        "geojson": {
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [0.1, 0.0], [0.1, 0.1], [0.0, 0.1], [0.0, 0.0]]]
        },
        "properties": {"tms": format!("https://tiles.example/{id}/{{z}}/{{x}}/{{y}}")}
    })
}

fn runner(source: Arc<StaticSource>, store: Arc<RecordingStore>, fail_tiles: bool) -> SyncRunner {
    SyncRunner::new(source, store, Arc::new(FakeTiles { fail: fail_tiles }))
}

#[tokio::test]
async fn test_first_run_publishes_everything_and_state_last() {
    let store = RecordingStore::new();
    let source = StaticSource::new(vec![
        image("img1", "2024-01-01T00:00:00Z"),
        image("img2", "2024-02-01T00:00:00Z"),
    ]);

    let report = runner(source, store.clone(), false).run().await.unwrap();

    assert_eq!(report.decision, SyncDecision::FullPublish);
    assert_eq!(report.new, 2);
    assert_eq!(report.writes, 5);

    let writes = store.writes();
    assert_eq!(writes.len(), 5);
    assert_eq!(writes.last().map(String::as_str), Some(STATE_KEY));
    assert!(writes.contains(&record_key("img1")));
    assert!(writes.contains(&FEATURE_COLLECTION_KEY.to_string()));
    assert!(writes.contains(&TILE_ARCHIVE_KEY.to_string()));

    let doc = store.json(&record_key("img1")).await.unwrap();
    assert_eq!(doc["title"], "Image img1");
}

#[tokio::test]
async fn test_unchanged_catalog_performs_zero_writes() {
    let store = RecordingStore::new();
    let catalog = vec![
        image("img1", "2024-01-01T00:00:00Z"),
        image("img2", "2024-02-01T00:00:00Z"),
    ];
    let source = StaticSource::new(catalog.clone());
    runner(source.clone(), store.clone(), false).run().await.unwrap();
    store.clear_writes();

    let mut reordered = catalog;
    reordered.reverse();
    source.set(reordered);
    let report = runner(source, store.clone(), false).run().await.unwrap();

    assert_eq!(report.decision, SyncDecision::NoOp);
    assert_eq!(report.writes, 0);
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_new_record_is_the_only_record_republished() {
    let store = RecordingStore::new();
    let state: SyncState = [("img1", "2024-01-01T00:00:00Z")].into_iter().collect();
    BlobStateStore::new(store.clone()).save(&state).await.unwrap();
    store.clear_writes();

    let source = StaticSource::new(vec![
        image("img1", "2024-01-01T00:00:00Z"),
        image("img2", "2024-02-01T00:00:00Z"),
    ]);
    let report = runner(source, store.clone(), false).run().await.unwrap();

    assert_eq!(report.decision, SyncDecision::PartialUpdate);
    assert_eq!(report.new, 1);
    assert_eq!(report.changed, 0);

    let writes = store.writes();
    assert!(writes.contains(&record_key("img2")));
    assert!(!writes.contains(&record_key("img1")));

    let saved = store.json(STATE_KEY).await.unwrap();
    assert_eq!(
        saved,
        json!({"img1": "2024-01-01T00:00:00Z", "img2": "2024-02-01T00:00:00Z"})
    );

    // The aggregate outputs are rebuilt from every current record.
    let collection = store.json(FEATURE_COLLECTION_KEY).await.unwrap();
    assert_eq!(collection["features"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_deleted_record_leaves_stale_document() {
    let store = RecordingStore::new();
    let source = StaticSource::new(vec![
        image("img1", "2024-01-01T00:00:00Z"),
        image("img2", "2024-01-01T00:00:00Z"),
    ]);
    runner(source.clone(), store.clone(), false).run().await.unwrap();

    source.set(vec![
        image("img1", "2024-03-01T00:00:00Z"),
        image("img3", "2024-03-01T00:00:00Z"),
    ]);
    let report = runner(source, store.clone(), false).run().await.unwrap();
    assert_eq!(report.removed, 1);

    // Dropped from state and aggregate outputs, but its per-record document stays.
    let state = store.json(STATE_KEY).await.unwrap();
    assert!(state.get("img2").is_none());
    let collection = store.json(FEATURE_COLLECTION_KEY).await.unwrap();
    let ids: Vec<&str> = collection["features"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["properties"]["_id"].as_str())
        .collect();
    assert!(!ids.contains(&"img2"));
    assert!(store.json(&record_key("img2")).await.is_some());
}

#[tokio::test]
async fn test_truncated_fetch_aborts_before_any_write() {
    let store = RecordingStore::new();
    let full: Vec<Value> = (0..20)
        .map(|i| image(&format!("img{i}"), "2024-01-01T00:00:00Z"))
        .collect();
    let source = StaticSource::new(full);
    runner(source.clone(), store.clone(), false).run().await.unwrap();
    store.clear_writes();

    source.set(vec![image("img0", "2024-06-01T00:00:00Z")]);
    let err = runner(source.clone(), store.clone(), false)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, MirrorError::InvariantViolation(_)));
    assert!(err.is_pre_publish());
    assert!(store.writes().is_empty());
    assert_eq!(store.json(STATE_KEY).await.unwrap().as_object().unwrap().len(), 20);

    // An explicit opt-out lets the caller accept the shrink.
    let report = runner(source, store.clone(), false)
        .with_differ(SyncDiffer::new(ShrinkGuard::disabled()))
        .run()
        .await
        .unwrap();
    assert_eq!(report.removed, 19);
}

#[tokio::test]
async fn test_tile_failure_leaves_previous_artifacts() {
    let store = RecordingStore::new();
    let source = StaticSource::new(vec![image("img1", "2024-01-01T00:00:00Z")]);
    runner(source.clone(), store.clone(), false).run().await.unwrap();
    let collection_before = store.json(FEATURE_COLLECTION_KEY).await.unwrap();
    store.clear_writes();

    source.set(vec![
        image("img1", "2024-01-01T00:00:00Z"),
        image("img2", "2024-02-01T00:00:00Z"),
    ]);
    let err = runner(source, store.clone(), true).run().await.unwrap_err();

    assert!(matches!(err, MirrorError::TileBuild { .. }));
    assert!(store.writes().is_empty());
    assert_eq!(store.json(FEATURE_COLLECTION_KEY).await.unwrap(), collection_before);
    assert!(store.json(&record_key("img2")).await.is_none());
}

#[tokio::test]
async fn test_publish_failure_does_not_advance_state() {
    let store = RecordingStore::new();
    let source = StaticSource::new(vec![image("img1", "2024-01-01T00:00:00Z")]);
    runner(source.clone(), store.clone(), false).run().await.unwrap();

    source.set(vec![
        image("img1", "2024-01-01T00:00:00Z"),
        image("img2", "2024-02-01T00:00:00Z"),
    ]);
    store.fail_on(Some(TILE_ARCHIVE_KEY));
    let err = runner(source.clone(), store.clone(), false)
        .run()
        .await
        .unwrap_err();
    assert!(!err.is_pre_publish());
    assert!(store.json(STATE_KEY).await.unwrap().get("img2").is_none());

    // The next run sees img2 as new again and completes the publish.
    store.fail_on(None);
    let report = runner(source, store.clone(), false).run().await.unwrap();
    assert_eq!(report.new, 1);
    assert!(store.json(STATE_KEY).await.unwrap().get("img2").is_some());
}

#[tokio::test]
async fn test_malformed_and_non_spatial_records() {
    let store = RecordingStore::new();
    let mut no_geometry = image("img2", "2024-01-01T00:00:00Z");
    no_geometry["geojson"] = Value::Null;
    let source = StaticSource::new(vec![
        image("img1", "2024-01-01T00:00:00Z"),
        no_geometry,
        json!({"title": "no id", "uploaded_at": "2024-01-01T00:00:00Z"}),
    ]);

    let report = runner(source, store.clone(), false).run().await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.records, 2);
    assert_eq!(report.features, 1);
    assert_eq!(report.non_spatial, 1);

    // Non-spatial records still get their document and state entry.
    assert!(store.json(&record_key("img2")).await.is_some());
    assert!(store.json(STATE_KEY).await.unwrap().get("img2").is_some());
}
