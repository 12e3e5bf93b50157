//! `GeoJSON` `FeatureCollection` parser.
//!
//! Each feature's `properties` become the record attributes; a
//! `Polygon` geometry's first ring is the exterior. Features without a
//! usable polygon geometry are skipped, matching the KML skip rule.

use std::collections::BTreeMap;

use geojson::{Feature, FeatureCollection, GeoJson};
use ndvi_profile_models::PolygonRecord;

use crate::{FormatError, FormatParser};

/// Parser for uploaded `.geojson` documents.
pub struct GeoJsonParser;

impl FormatParser for GeoJsonParser {
    fn extension(&self) -> &'static str {
        "geojson"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<PolygonRecord>, FormatError> {
        let text = std::str::from_utf8(bytes).map_err(|e| FormatError::MalformedGeoJson {
            message: format!("not valid UTF-8: {e}"),
        })?;

        let geojson: GeoJson = text.parse::<GeoJson>().map_err(|e| FormatError::MalformedGeoJson {
            message: e.to_string(),
        })?;

        let collection =
            FeatureCollection::try_from(geojson).map_err(|_| FormatError::MalformedGeoJson {
                message: "document is not a FeatureCollection".to_string(),
            })?;

        Ok(collection
            .features
            .iter()
            .filter_map(feature_to_record)
            .collect())
    }
}

/// Converts one feature into a [`PolygonRecord`], or `None` if it has
/// no usable polygon geometry.
fn feature_to_record(feature: &Feature) -> Option<PolygonRecord> {
    let geometry = feature.geometry.as_ref()?;

    let geojson::Value::Polygon(rings) = &geometry.value else {
        log::warn!("Skipping feature with non-Polygon geometry");
        return None;
    };

    let polygon = rings_to_polygon(rings)?;

    let attributes: BTreeMap<String, serde_json::Value> = feature
        .properties
        .as_ref()
        .map(|props| props.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    Some(PolygonRecord::new(attributes, polygon))
}

/// Builds a polygon from `GeoJSON` rings (first ring exterior, rest
/// holes). Altitude values beyond the first two positions are ignored.
fn rings_to_polygon(rings: &[Vec<Vec<f64>>]) -> Option<geo::Polygon<f64>> {
    let (exterior, holes) = rings.split_first()?;

    let exterior = ring_to_line_string(exterior)?;
    let holes: Vec<geo::LineString<f64>> = holes
        .iter()
        .filter_map(|ring| ring_to_line_string(ring))
        .collect();

    Some(geo::Polygon::new(exterior, holes))
}

fn ring_to_line_string(ring: &[Vec<f64>]) -> Option<geo::LineString<f64>> {
    if ring.len() < 3 {
        log::warn!("Skipping degenerate ring with {} positions", ring.len());
        return None;
    }

    let coords: Vec<geo::Coord<f64>> = ring
        .iter()
        .filter(|position| position.len() >= 2)
        .map(|position| geo::Coord {
            x: position[0],
            y: position[1],
        })
        .collect();

    (coords.len() >= 3).then(|| geo::LineString::from(coords))
}
