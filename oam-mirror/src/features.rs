//! Projection of catalog records into GeoJSON features.
//!
//! The upstream document shape has drifted over time: some display fields
//! live at the top level, others under a nested `properties` object, and
//! older documents are not consistent about which. Every output property is
//! therefore read through a fallback chain of locations, first hit wins:
//!
//! | property            | read from                                         |
//! |---------------------|---------------------------------------------------|
//! | `_id`               | `_id`                                             |
//! | `title`             | `title`, else `properties.title`                  |
//! | `provider`          | `provider`, else `properties.provider`            |
//! | `platform`          | `platform`, else `properties.platform`            |
//! | `sensor`            | `properties.sensor`, else `sensor`                |
//! | `gsd`               | `gsd`, else `properties.gsd`                      |
//! | `file_size`         | `file_size`, else `properties.file_size`          |
//! | `acquisition_start` | `acquisition_start`, else `properties.acquisition_start` |
//! | `acquisition_end`   | `acquisition_end`, else `properties.acquisition_end` |
//! | `tms`               | `properties.tms`, else `tms`                      |
//! | `thumbnail`         | `properties.thumbnail`, else `thumbnail`          |
//! | `uploaded_at`       | `uploaded_at`                                     |
//!
//! A property found nowhere is emitted as `null` so every feature carries the
//! same keys.

use std::fmt;

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value as GeoValue};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::catalog::{CatalogRecord, FINGERPRINT_FIELD, ID_FIELD};
use crate::error::Result;

const NESTED: &str = "properties";

/// Where to look for one output property.
#[derive(Debug, Clone, Copy)]
enum Location {
    Top(&'static str),
    Nested(&'static str),
}

impl Location {
    fn read<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        let value = match self {
            Self::Top(field) => document.get(field),
            Self::Nested(field) => document.get(NESTED).and_then(|p| p.get(field)),
        };
        value.filter(|v| !v.is_null())
    }
}

/// One output property and the ordered locations it is read from.
#[derive(Debug, Clone)]
pub struct PropertyRule {
    name: &'static str,
    chain: Vec<Location>,
}

impl PropertyRule {
    /// Top-level field, else the nested one.
    fn top_first(name: &'static str) -> Self {
        Self {
            name,
            chain: vec![Location::Top(name), Location::Nested(name)],
        }
    }

    /// Nested field, else the top-level one.
    fn nested_first(name: &'static str) -> Self {
        Self {
            name,
            chain: vec![Location::Nested(name), Location::Top(name)],
        }
    }

    fn top_only(name: &'static str) -> Self {
        Self {
            name,
            chain: vec![Location::Top(name)],
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn resolve(&self, document: &Value) -> Value {
        self.chain
            .iter()
            .find_map(|location| location.read(document))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Why a record produced no spatial feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonSpatialReason {
    MissingGeometry,
    InvalidGeometry(String),
}

impl fmt::Display for NonSpatialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingGeometry => f.write_str("missing footprint geometry"),
            Self::InvalidGeometry(detail) => write!(f, "invalid footprint geometry: {detail}"),
        }
    }
}

/// Result of projecting one record.
///
/// A non-spatial record is left out of the feature collection and tile
/// archive. It still receives its per-record document and state entry.
#[derive(Debug, Clone)]
pub enum FeatureOutcome {
    Spatial(Box<Feature>),
    NonSpatial(NonSpatialReason),
}

/// Projects [`CatalogRecord`]s into output features.
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    rules: Vec<PropertyRule>,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self {
            rules: vec![
                PropertyRule::top_only(ID_FIELD),
                PropertyRule::top_first("title"),
                PropertyRule::top_first("provider"),
                PropertyRule::top_first("platform"),
                PropertyRule::nested_first("sensor"),
                PropertyRule::top_first("gsd"),
                PropertyRule::top_first("file_size"),
                PropertyRule::top_first("acquisition_start"),
                PropertyRule::top_first("acquisition_end"),
                PropertyRule::nested_first("tms"),
                PropertyRule::nested_first("thumbnail"),
                PropertyRule::top_only(FINGERPRINT_FIELD),
            ],
        }
    }
}

impl FeatureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output property names, in emission order.
    pub fn property_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(PropertyRule::name)
    }

    /// Projects one record.
    pub fn build(&self, record: &CatalogRecord) -> FeatureOutcome {
        let Some(footprint) = record.footprint() else {
            return FeatureOutcome::NonSpatial(NonSpatialReason::MissingGeometry);
        };

        let geometry = match parse_footprint(footprint) {
            Ok(geometry) => geometry,
            Err(reason) => return FeatureOutcome::NonSpatial(reason),
        };

        let properties: JsonObject = self
            .rules
            .iter()
            .map(|rule| (rule.name.to_string(), rule.resolve(record.document())))
            .collect();

        FeatureOutcome::Spatial(Box::new(Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }))
    }

    /// Projects every record into one collection.
    #[instrument(skip_all)]
    pub fn build_collection<'a>(
        &self,
        records: impl IntoIterator<Item = &'a CatalogRecord>,
    ) -> FeatureCollectionBuild {
        let mut build = FeatureCollectionBuild::default();
        for record in records {
            match self.build(record) {
                FeatureOutcome::Spatial(feature) => build.features.push(*feature),
                FeatureOutcome::NonSpatial(reason) => {
                    debug!(id = %record.id(), reason = %reason, "Record excluded from spatial output");
                    build.non_spatial.push((record.id().to_string(), reason));
                }
            }
        }
        build
    }
}

/// Accepts polygonal GeoJSON geometries whose rings are closed-ring sized.
fn parse_footprint(value: &Value) -> std::result::Result<Geometry, NonSpatialReason> {
    let geometry = Geometry::from_json_value(value.clone())
        .map_err(|e| NonSpatialReason::InvalidGeometry(e.to_string()))?;

    let polygons: Vec<&Vec<Vec<Vec<f64>>>> = match &geometry.value {
        GeoValue::Polygon(rings) => vec![rings],
        GeoValue::MultiPolygon(polygons) => polygons.iter().collect(),
        GeoValue::Point(_) | GeoValue::MultiPoint(_) => {
            return Err(NonSpatialReason::InvalidGeometry("point footprint".to_string()))
        }
        GeoValue::LineString(_) | GeoValue::MultiLineString(_) => {
            return Err(NonSpatialReason::InvalidGeometry("line footprint".to_string()))
        }
        GeoValue::GeometryCollection(_) => {
            return Err(NonSpatialReason::InvalidGeometry(
                "geometry collection footprint".to_string(),
            ))
        }
    };

    if polygons.is_empty() {
        return Err(NonSpatialReason::InvalidGeometry("no polygons".to_string()));
    }
    for rings in polygons {
        match rings.first() {
            Some(exterior) if exterior.len() >= 4 => {}
            _ => {
                return Err(NonSpatialReason::InvalidGeometry(
                    "polygon exterior ring has fewer than 4 positions".to_string(),
                ))
            }
        }
    }
    Ok(geometry)
}

/// Features for one run plus the records left out of spatial output.
#[derive(Debug, Clone, Default)]
pub struct FeatureCollectionBuild {
    pub features: Vec<Feature>,
    /// Identifier and reason for each non-spatial record.
    pub non_spatial: Vec<(String, NonSpatialReason)>,
}

impl FeatureCollectionBuild {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Serializes the collection as a GeoJSON `FeatureCollection`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let collection = FeatureCollection {
            bbox: None,
            features: self.features.clone(),
            foreign_members: None,
        };
        Ok(serde_json::to_vec(&collection)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square() -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
        })
    }

    fn record(document: Value) -> CatalogRecord {
        CatalogRecord::from_value(document).unwrap()
    }

    fn properties(outcome: FeatureOutcome) -> JsonObject {
        match outcome {
            FeatureOutcome::Spatial(feature) => feature.properties.unwrap(),
            FeatureOutcome::NonSpatial(reason) => panic!("unexpected non-spatial: {reason}"),
        }
    }

    #[test]
    fn test_current_document_shape() {
        let rec = record(json!({
            "_id": "img1",
            "uploaded_at": "2024-01-01T00:00:00Z",
            "title": "Harbor",
            "provider": "Drone Co",
            "platform": "uav",
            "gsd": 0.05,
            "file_size": 1024,
            "acquisition_start": "2023-12-01",
            "acquisition_end": "2023-12-02",
            "geojson": square(),
            "properties": {
                "sensor": "DJI",
                "tms": "https://tiles/{z}/{x}/{y}",
                "thumbnail": "https://thumb.png"
            }
        }));

        let props = properties(FeatureBuilder::new().build(&rec));
        assert_eq!(props["_id"], "img1");
        assert_eq!(props["sensor"], "DJI");
        assert_eq!(props["tms"], "https://tiles/{z}/{x}/{y}");
        assert_eq!(props["gsd"], 0.05);
        assert_eq!(props.len(), 12);
    }

    #[test]
    fn test_fallback_to_alternate_location() {
        let rec = record(json!({
            "_id": "img2",
            "uploaded_at": "2020-01-01",
            "sensor": "Canon",
            "thumbnail": "https://old-thumb.png",
            "geojson": square(),
            "properties": {"title": "Nested title", "provider": "Nested provider"}
        }));

        let props = properties(FeatureBuilder::new().build(&rec));
        assert_eq!(props["title"], "Nested title");
        assert_eq!(props["provider"], "Nested provider");
        assert_eq!(props["sensor"], "Canon");
        assert_eq!(props["thumbnail"], "https://old-thumb.png");
        assert_eq!(props["platform"], Value::Null);
    }

    #[test]
    fn test_preferred_location_wins() {
        let rec = record(json!({
            "_id": "img3",
            "uploaded_at": "2020-01-01",
            "title": "Top",
            "tms": "top-tms",
            "geojson": square(),
            "properties": {"title": "Nested", "tms": "nested-tms"}
        }));

        let props = properties(FeatureBuilder::new().build(&rec));
        assert_eq!(props["title"], "Top");
        assert_eq!(props["tms"], "nested-tms");
    }

    #[test]
    fn test_missing_geometry_is_non_spatial() {
        let rec = record(json!({"_id": "img4", "uploaded_at": "2020-01-01"}));
        assert!(matches!(
            FeatureBuilder::new().build(&rec),
            FeatureOutcome::NonSpatial(NonSpatialReason::MissingGeometry)
        ));
    }

    #[test]
    fn test_invalid_geometry_is_non_spatial() {
        let builder = FeatureBuilder::new();
        for geometry in [
            json!({"type": "Polygon"}),
            json!({"type": "Point", "coordinates": [1.0, 2.0]}),
            json!({"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 1.0]]]}),
            json!("POLYGON((0 0, 1 0, 1 1, 0 0))"),
        ] {
            let rec = record(json!({"_id": "bad", "uploaded_at": "t", "geojson": geometry}));
            assert!(matches!(
                builder.build(&rec),
                FeatureOutcome::NonSpatial(NonSpatialReason::InvalidGeometry(_))
            ));
        }
    }

    #[test]
    fn test_collection_excludes_non_spatial() {
        let records = vec![
            record(json!({"_id": "a", "uploaded_at": "t", "geojson": square()})),
            record(json!({"_id": "b", "uploaded_at": "t"})),
        ];
        let build = FeatureBuilder::new().build_collection(&records);

        assert_eq!(build.len(), 1);
        assert_eq!(build.non_spatial.len(), 1);
        assert_eq!(build.non_spatial[0].0, "b");

        let parsed: Value = serde_json::from_slice(&build.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed["type"], "FeatureCollection");
        assert_eq!(parsed["features"].as_array().unwrap().len(), 1);
    }
}
