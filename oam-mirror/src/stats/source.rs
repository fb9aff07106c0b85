use std::sync::Arc;

use arrow::array::{Array, AsArray, RecordBatch, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use datafusion::prelude::SessionContext;
use tracing::{debug, info, instrument, warn};

use super::aggregator::ContributionEvent;
use crate::error::{MirrorError, Result};
use crate::logging::{truncate_field, LogConfig};

/// Table the default query reads from.
pub const DEFAULT_EVENTS_TABLE: &str = "metas";

/// Maps the catalog metadata table onto the event columns.
pub const DEFAULT_EVENTS_QUERY: &str = r#"SELECT "user" AS contributor, uploaded_at AS "timestamp", platform, geojson AS footprint FROM metas"#;

pub const CONTRIBUTOR_COLUMN: &str = "contributor";
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const PLATFORM_COLUMN: &str = "platform";
pub const FOOTPRINT_COLUMN: &str = "footprint";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Yields the full secondary record stream for one stats run.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn events(&self) -> Result<Vec<ContributionEvent>>;
}

/// [`EventSource`] running one SQL query against a DataFusion context.
///
/// The result must have `contributor` and `timestamp` columns; `platform` and
/// `footprint` are optional. Any column type that casts to text is accepted.
/// Footprints are GeoJSON text.
#[derive(Clone)]
pub struct SqlEventSource {
    ctx: Arc<SessionContext>,
    query: String,
    log_config: LogConfig,
}

impl std::fmt::Debug for SqlEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlEventSource")
            .field("query", &self.query)
            .finish()
    }
}

impl SqlEventSource {
    /// Reads events with [`DEFAULT_EVENTS_QUERY`].
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self::with_query(ctx, DEFAULT_EVENTS_QUERY)
    }

    pub fn with_query(ctx: Arc<SessionContext>, query: impl Into<String>) -> Self {
        Self {
            ctx,
            query: query.into(),
            log_config: LogConfig::default(),
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    fn decode(&self, batch: &RecordBatch) -> Result<(Vec<ContributionEvent>, usize)> {
        let contributor = text_column(batch, CONTRIBUTOR_COLUMN)?.ok_or_else(|| missing(CONTRIBUTOR_COLUMN))?;
        let timestamp = text_column(batch, TIMESTAMP_COLUMN)?.ok_or_else(|| missing(TIMESTAMP_COLUMN))?;
        let platform = text_column(batch, PLATFORM_COLUMN)?;
        let footprint = text_column(batch, FOOTPRINT_COLUMN)?;

        let mut unparseable = 0;
        let events = (0..batch.num_rows())
            .map(|row| {
                let raw_ts = value_at(&timestamp, row);
                let parsed = raw_ts.and_then(parse_timestamp);
                if let (Some(raw), None) = (raw_ts, parsed) {
                    unparseable += 1;
                    debug!(
                        value = %truncate_field(raw, self.log_config.max_field_length),
                        "Unparseable event timestamp"
                    );
                }

                ContributionEvent {
                    contributor: value_at(&contributor, row).map(str::to_string),
                    timestamp: parsed,
                    platform: platform
                        .as_ref()
                        .and_then(|col| value_at(col, row))
                        .map(str::to_string),
                    footprint: footprint
                        .as_ref()
                        .and_then(|col| value_at(col, row))
                        .and_then(|raw| serde_json::from_str(raw).ok()),
                }
            })
            .collect();
        Ok((events, unparseable))
    }
}

#[async_trait]
impl EventSource for SqlEventSource {
    #[instrument(skip(self))]
    async fn events(&self) -> Result<Vec<ContributionEvent>> {
        let batches = self.ctx.sql(&self.query).await?.collect().await?;

        let mut events = Vec::new();
        let mut unparseable = 0;
        for batch in &batches {
            let (decoded, bad) = self.decode(batch)?;
            events.extend(decoded);
            unparseable += bad;
        }

        if unparseable > 0 {
            warn!(events = unparseable, "Events with unparseable timestamps");
        }
        info!(events = events.len(), batches = batches.len(), "Loaded contribution events");
        Ok(events)
    }
}

fn missing(column: &str) -> MirrorError {
    MirrorError::data_source("SQL", format!("query result has no '{column}' column"))
}

/// The named column cast to UTF-8, or `None` if the batch lacks it.
fn text_column(batch: &RecordBatch, name: &str) -> Result<Option<StringArray>> {
    let Ok(index) = batch.schema().index_of(name) else {
        return Ok(None);
    };
    let column = cast(batch.column(index), &DataType::Utf8)?;
    Ok(Some(column.as_string::<i32>().clone()))
}

fn value_at(column: &StringArray, row: usize) -> Option<&str> {
    if column.is_null(row) {
        return None;
    }
    let value = column.value(row).trim();
    (!value.is_empty()).then_some(value)
}

/// RFC 3339, or a zone-less date-time taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = "2024-03-01T12:30:00+00:00";
        for raw in [
            "2024-03-01T12:30:00Z",
            "2024-03-01T14:30:00+02:00",
            "2024-03-01T12:30:00",
            "2024-03-01 12:30:00",
            "2024-03-01T12:30:00.000",
        ] {
            assert_eq!(parse_timestamp(raw).unwrap().to_rfc3339(), expected, "{raw}");
        }
        assert!(parse_timestamp("last tuesday").is_none());
    }

    #[tokio::test]
    async fn test_decode_string_columns() {
        let ctx = SessionContext::new();
        ctx.sql(
            "CREATE TABLE events AS VALUES \
             ('alice', '2024-01-02T00:00:00Z', 'UAV', '{\"type\":\"Polygon\",\"coordinates\":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}'), \
             ('bob', NULL, 'satellite', NULL)",
        )
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

        let source = SqlEventSource::with_query(
            Arc::new(ctx),
            "SELECT column1 AS contributor, column2 AS \"timestamp\", column3 AS platform, column4 AS footprint FROM events",
        );
        let events = source.events().await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].contributor.as_deref(), Some("alice"));
        assert_eq!(events[0].platform.as_deref(), Some("UAV"));
        assert!(events[0].footprint.is_some());
        assert!(events[1].timestamp.is_none());
        assert!(events[1].footprint.is_none());
    }

    #[tokio::test]
    async fn test_timestamp_typed_column() {
        let ctx = SessionContext::new();
        let source = SqlEventSource::with_query(
            Arc::new(ctx),
            "SELECT 'carol' AS contributor, to_timestamp('2023-11-05T08:00:00Z') AS \"timestamp\"",
        );
        let events = source.events().await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].timestamp.unwrap().to_rfc3339(),
            "2023-11-05T08:00:00+00:00"
        );
        assert!(events[0].platform.is_none());
    }

    #[tokio::test]
    async fn test_missing_required_column() {
        let source =
            SqlEventSource::with_query(Arc::new(SessionContext::new()), "SELECT 1 AS contributor");
        let err = source.events().await.unwrap_err();
        assert!(matches!(err, MirrorError::DataSource { .. }));
    }
}
