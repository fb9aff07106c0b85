use geo::GeodesicArea;
use serde_json::Value;

const SQ_M_PER_SQ_KM: f64 = 1_000_000.0;

/// Geodesic area of a GeoJSON geometry on the WGS84 ellipsoid, in km².
///
/// Returns `None` when the value is not a parseable GeoJSON geometry. Ring
/// orientation does not matter.
pub fn geodesic_area_sq_km(footprint: &Value) -> Option<f64> {
    let geometry = geojson::Geometry::from_json_value(footprint.clone()).ok()?;
    let geometry: geo::Geometry<f64> = geometry.try_into().ok()?;
    let area = geometry.geodesic_area_unsigned() / SQ_M_PER_SQ_KM;
    area.is_finite().then_some(area)
}
