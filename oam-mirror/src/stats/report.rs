//! Renderings of a [`StatsReport`] and their publication.
//!
//! The structured document and the flat table carry the same per-quarter
//! metrics; the human table is for console output only.

use std::fmt::Write;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, RecordBatch, StringArray, UInt64Array};
use arrow::csv::WriterBuilder;
use arrow::datatypes::{DataType, Field, Schema};
use tracing::{info, instrument};

use super::aggregator::{StatsBucket, StatsReport};
use crate::error::{MirrorError, Result};
use crate::storage::{
    ArtifactStore, CONTENT_TYPE_CSV, CONTENT_TYPE_JSON, STATS_CSV_KEY, STATS_JSON_KEY,
};

/// Converts a report into bytes of one output format.
pub trait ReportFormatter {
    fn format(&self, report: &StatsReport) -> Result<Vec<u8>>;
}

/// The structured document: totals plus an array of quarters.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self { pretty: true }
    }

    /// Sets whether to use pretty-printed JSON.
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportFormatter for JsonFormatter {
    fn format(&self, report: &StatsReport) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(report)?
        } else {
            serde_json::to_vec(report)?
        };
        Ok(bytes)
    }
}

/// The flat table, one row per quarter.
#[derive(Debug, Clone, Default)]
pub struct CsvFormatter;

impl CsvFormatter {
    pub const COLUMNS: [&'static str; 9] = [
        "period",
        "contributors",
        "images",
        "uav_images",
        "area_sq_km",
        "cumulative_contributors",
        "cumulative_images",
        "cumulative_uav_images",
        "cumulative_area_sq_km",
    ];

    fn to_batch(report: &StatsReport) -> Result<RecordBatch> {
        let rows = &report.quarters;
        let counts = |f: fn(&StatsBucket) -> u64| -> ArrayRef {
            Arc::new(UInt64Array::from_iter_values(rows.iter().map(f)))
        };
        let areas = |f: fn(&StatsBucket) -> f64| -> ArrayRef {
            Arc::new(Float64Array::from_iter_values(rows.iter().map(f)))
        };

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.period.as_str()))),
            counts(|r| r.contributors as u64),
            counts(|r| r.images),
            counts(|r| r.uav_images),
            areas(|r| r.area_sq_km),
            counts(|r| r.cumulative_contributors as u64),
            counts(|r| r.cumulative_images),
            counts(|r| r.cumulative_uav_images),
            areas(|r| r.cumulative_area_sq_km),
        ];

        let fields: Vec<Field> = Self::COLUMNS
            .iter()
            .map(|name| {
                let data_type = match *name {
                    "period" => DataType::Utf8,
                    "area_sq_km" | "cumulative_area_sq_km" => DataType::Float64,
                    _ => DataType::UInt64,
                };
                Field::new(*name, data_type, false)
            })
            .collect();

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}

impl ReportFormatter for CsvFormatter {
    fn format(&self, report: &StatsReport) -> Result<Vec<u8>> {
        let batch = Self::to_batch(report)?;
        let mut writer = WriterBuilder::new().with_header(true).build(Vec::new());
        writer.write(&batch)?;
        Ok(writer.into_inner())
    }
}

/// Fixed-width console table with a totals line.
#[derive(Debug, Clone, Default)]
pub struct HumanFormatter;

impl HumanFormatter {
    pub fn render(&self, report: &StatsReport) -> Result<String> {
        let fmt_err = |e: std::fmt::Error| MirrorError::Internal(format!("Failed to format table: {e}"));
        let mut out = String::new();

        writeln!(out, "\n=== OAM Quarterly Stats ===\n").map_err(fmt_err)?;
        writeln!(
            out,
            "{:<12} {:>8} {:>8} {:>8} {:>12}  {:>12} {:>12} {:>10} {:>12}",
            "Period", "Contrib", "Images", "UAV", "Area km²", "Cum Contrib", "Cum Images", "Cum UAV", "Cum km²"
        )
        .map_err(fmt_err)?;
        writeln!(out, "{}", "-".repeat(110)).map_err(fmt_err)?;

        for row in &report.quarters {
            writeln!(
                out,
                "{:<12} {:>8} {:>8} {:>8} {:>12.2}  {:>12} {:>12} {:>10} {:>12.2}",
                row.period,
                row.contributors,
                row.images,
                row.uav_images,
                row.area_sq_km,
                row.cumulative_contributors,
                row.cumulative_images,
                row.cumulative_uav_images,
                row.cumulative_area_sq_km
            )
            .map_err(fmt_err)?;
        }

        writeln!(
            out,
            "\nTotal: {} images, {} UAV, {:.2} sq km, {} contributors",
            report.total_images,
            report.total_uav_images,
            report.total_area_sq_km,
            report.total_contributors
        )
        .map_err(fmt_err)?;
        if report.skipped_events > 0 {
            writeln!(out, "Skipped: {} events without timestamp", report.skipped_events)
                .map_err(fmt_err)?;
        }
        Ok(out)
    }
}

impl ReportFormatter for HumanFormatter {
    fn format(&self, report: &StatsReport) -> Result<Vec<u8>> {
        Ok(self.render(report)?.into_bytes())
    }
}

/// Writes `stats.json`, then `stats.csv`. Both are rendered before either write.
#[instrument(skip_all, fields(periods = report.quarters.len()))]
pub async fn publish_stats(store: &dyn ArtifactStore, report: &StatsReport) -> Result<()> {
    let json = JsonFormatter::new().format(report)?;
    let csv = CsvFormatter.format(report)?;

    store.put(STATS_JSON_KEY, json, CONTENT_TYPE_JSON).await?;
    store.put(STATS_CSV_KEY, csv, CONTENT_TYPE_CSV).await?;
    info!("Published statistics");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObjectStoreArtifacts;
    use chrono::Utc;

    fn report() -> StatsReport {
        StatsReport {
            generated_at: Utc::now(),
            total_images: 5,
            total_uav_images: 2,
            total_area_sq_km: 12.5,
            total_contributors: 2,
            skipped_events: 0,
            quarters: vec![
                StatsBucket {
                    year: 2024,
                    quarter: 1,
                    period: "2024 Q1".to_string(),
                    contributors: 2,
                    images: 3,
                    uav_images: 1,
                    area_sq_km: 10.25,
                    cumulative_contributors: 2,
                    cumulative_images: 3,
                    cumulative_uav_images: 1,
                    cumulative_area_sq_km: 10.25,
                    excluded_from_area: 0,
                },
                StatsBucket {
                    year: 2024,
                    quarter: 2,
                    period: "2024 Q2".to_string(),
                    contributors: 1,
                    images: 2,
                    uav_images: 1,
                    area_sq_km: 2.25,
                    cumulative_contributors: 2,
                    cumulative_images: 5,
                    cumulative_uav_images: 2,
                    cumulative_area_sq_km: 12.5,
                    excluded_from_area: 1,
                },
            ],
        }
    }

    #[test]
    fn test_csv_layout() {
        let csv = String::from_utf8(CsvFormatter.format(&report()).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], CsvFormatter::COLUMNS.join(","));
        assert_eq!(lines[1], "2024 Q1,2,3,1,10.25,2,3,1,10.25");
        assert_eq!(lines[2], "2024 Q2,1,2,1,2.25,2,5,2,12.5");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_json_document() {
        let bytes = JsonFormatter::new().format(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["total_contributors"], 2);
        assert_eq!(value["quarters"][1]["period"], "2024 Q2");
        assert_eq!(value["quarters"][1]["cumulative_contributors"], 2);
        assert!(value["quarters"][1].get("excluded_from_area").is_none());
        assert!(value["generated_at"].is_string());
    }

    #[test]
    fn test_human_table() {
        let text = HumanFormatter.render(&report()).unwrap();
        assert!(text.contains("2024 Q2"));
        assert!(text.contains("Total: 5 images, 2 UAV, 12.50 sq km, 2 contributors"));
    }

    #[tokio::test]
    async fn test_publish_writes_both_documents() {
        let store = ObjectStoreArtifacts::in_memory();
        publish_stats(&store, &report()).await.unwrap();

        assert!(store.get(STATS_JSON_KEY).await.unwrap().is_some());
        let csv = store.get(STATS_CSV_KEY).await.unwrap().unwrap();
        assert!(String::from_utf8(csv).unwrap().starts_with("period,"));
    }
}
