//! Quarterly contribution statistics.
//!
//! Every stats run recomputes from a full scan of the event source; there is
//! no incremental stats state. Image, subtype and area totals use every
//! timestamped event. Contributor metrics only use events at or after the
//! configured tracking start, because the contributor source has incomplete
//! history before it.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use datafusion::prelude::SessionContext;
//! use oam_mirror::stats::{AggregatorConfig, EventSource, SqlEventSource, StatsAggregator};
//!
//! # async fn example() -> oam_mirror::error::Result<()> {
//! let ctx = Arc::new(SessionContext::new());
//! // ... register the `metas` table ...
//! let events = SqlEventSource::new(ctx).events().await?;
//! let report = StatsAggregator::new(AggregatorConfig::default()).aggregate(events);
//! println!("{} contributors", report.total_contributors);
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod area;
#[cfg(any(feature = "postgres", feature = "sqlite"))]
mod database;
mod period;
pub mod report;
mod source;

pub use aggregator::{AggregatorConfig, ContributionEvent, StatsAggregator, StatsBucket, StatsReport};
pub use area::geodesic_area_sq_km;
#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub use database::{DatabaseConfig, DatabaseSource};
pub use period::Quarter;
pub use report::{publish_stats, CsvFormatter, HumanFormatter, JsonFormatter, ReportFormatter};
pub use source::{EventSource, SqlEventSource, DEFAULT_EVENTS_QUERY, DEFAULT_EVENTS_TABLE};
