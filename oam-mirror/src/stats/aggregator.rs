use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::area::geodesic_area_sq_km;
use super::period::Quarter;
use crate::log_period;
use crate::logging::LogConfig;

/// One row of the secondary record stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContributionEvent {
    pub contributor: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub platform: Option<String>,
    /// GeoJSON footprint geometry.
    pub footprint: Option<Value>,
}

impl ContributionEvent {
    pub fn new(contributor: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            contributor: Some(contributor.into()),
            timestamp: Some(timestamp),
            ..Default::default()
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_footprint(mut self, footprint: Value) -> Self {
        self.footprint = Some(footprint);
        self
    }
}

/// Aggregation settings.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// First instant with complete contributor history. Earlier events still
    /// count toward image, subtype and area totals.
    pub tracking_start: Option<DateTime<Utc>>,
    /// Platform value counted as the subtype, compared case-insensitively.
    pub subtype: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            tracking_start: None,
            subtype: "uav".to_string(),
        }
    }
}

impl AggregatorConfig {
    pub fn with_tracking_start(mut self, tracking_start: Option<DateTime<Utc>>) -> Self {
        self.tracking_start = tracking_start;
        self
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = subtype.into();
        self
    }
}

/// Metrics for one quarter, with running totals up to and including it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsBucket {
    pub year: i32,
    pub quarter: u8,
    pub period: String,
    /// Distinct contributors seen in this quarter.
    pub contributors: usize,
    pub images: u64,
    pub uav_images: u64,
    pub area_sq_km: f64,
    /// Distinct contributors seen in this or any earlier quarter.
    pub cumulative_contributors: usize,
    pub cumulative_images: u64,
    pub cumulative_uav_images: u64,
    pub cumulative_area_sq_km: f64,
    /// Events counted as images but without a usable footprint.
    #[serde(skip)]
    pub excluded_from_area: u64,
}

impl StatsBucket {
    pub fn period(&self) -> Option<Quarter> {
        Quarter::new(self.year, self.quarter)
    }
}

/// Output of one aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub generated_at: DateTime<Utc>,
    pub total_images: u64,
    pub total_uav_images: u64,
    pub total_area_sq_km: f64,
    pub total_contributors: usize,
    /// Events dropped for lack of a timestamp.
    pub skipped_events: u64,
    pub quarters: Vec<StatsBucket>,
}

#[derive(Debug, Default)]
struct Accumulator {
    images: u64,
    uav_images: u64,
    area_sq_km: f64,
    excluded_from_area: u64,
    contributors: HashSet<String>,
}

/// Buckets [`ContributionEvent`]s by quarter.
///
/// Events may arrive in any order. Buckets are walked chronologically when
/// the cumulative contributor set is built, so each bucket's cumulative count
/// is the size of the union of every contributor set up to it.
#[derive(Debug, Clone, Default)]
pub struct StatsAggregator {
    config: AggregatorConfig,
    log_config: LogConfig,
}

impl StatsAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            log_config: LogConfig::default(),
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    fn is_subtype(&self, platform: Option<&str>) -> bool {
        platform.is_some_and(|p| p.trim().to_lowercase() == self.config.subtype.to_lowercase())
    }

    fn tracks_contributor(&self, timestamp: &DateTime<Utc>) -> bool {
        self.config
            .tracking_start
            .map_or(true, |start| *timestamp >= start)
    }

    #[instrument(skip_all)]
    pub fn aggregate(&self, events: impl IntoIterator<Item = ContributionEvent>) -> StatsReport {
        let mut buckets: BTreeMap<Quarter, Accumulator> = BTreeMap::new();
        let mut skipped_events = 0u64;
        let mut untracked_contributions = 0u64;

        for event in events {
            let Some(timestamp) = event.timestamp else {
                skipped_events += 1;
                continue;
            };

            let bucket = buckets.entry(Quarter::containing(&timestamp)).or_default();
            bucket.images += 1;
            if self.is_subtype(event.platform.as_deref()) {
                bucket.uav_images += 1;
            }

            match event.footprint.as_ref().and_then(geodesic_area_sq_km) {
                Some(area) => bucket.area_sq_km += area,
                None => bucket.excluded_from_area += 1,
            }

            match event.contributor {
                Some(contributor) if !contributor.is_empty() => {
                    if self.tracks_contributor(&timestamp) {
                        bucket.contributors.insert(contributor);
                    } else {
                        untracked_contributions += 1;
                    }
                }
                _ => {}
            }
        }

        if skipped_events > 0 {
            warn!(skipped = skipped_events, "Events without timestamp skipped");
        }
        if untracked_contributions > 0 {
            info!(
                events = untracked_contributions,
                "Events before contributor tracking start left out of contributor counts"
            );
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut cumulative_images = 0u64;
        let mut cumulative_uav_images = 0u64;
        let mut cumulative_area = 0.0f64;
        let mut quarters = Vec::with_capacity(buckets.len());

        for (quarter, bucket) in buckets {
            let contributors = bucket.contributors.len();
            seen.extend(bucket.contributors);
            cumulative_images += bucket.images;
            cumulative_uav_images += bucket.uav_images;
            cumulative_area += bucket.area_sq_km;

            log_period!(
                self.log_config,
                period = %quarter,
                images = bucket.images,
                contributors,
                cumulative_contributors = seen.len(),
                "Aggregated period"
            );

            quarters.push(StatsBucket {
                year: quarter.year(),
                quarter: quarter.quarter(),
                period: quarter.label(),
                contributors,
                images: bucket.images,
                uav_images: bucket.uav_images,
                area_sq_km: round2(bucket.area_sq_km),
                cumulative_contributors: seen.len(),
                cumulative_images,
                cumulative_uav_images,
                cumulative_area_sq_km: round2(cumulative_area),
                excluded_from_area: bucket.excluded_from_area,
            });
        }

        info!(
            periods = quarters.len(),
            images = cumulative_images,
            contributors = seen.len(),
            "Aggregation complete"
        );

        StatsReport {
            generated_at: Utc::now(),
            total_images: cumulative_images,
            total_uav_images: cumulative_uav_images,
            total_area_sq_km: round2(cumulative_area),
            total_contributors: seen.len(),
            skipped_events,
            quarters,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
