#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Canonical data model for the NDVI profile pipeline.
//!
//! Every upload format (shapefile archive, `GeoJSON`, KML) is normalized
//! into [`PolygonRecord`] values; the enrichment step turns the external
//! service's time series into [`IndexObservation`]s, which the aggregation
//! step merges back into [`EnrichedRow`]s.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};

/// Divisor applied to the raw integer index readings returned by the
/// field-profile service.
pub const INDEX_SCALE: f64 = 250.0;

/// Suffix appended to formatted observation dates to form CSV column
/// names. Keeps observation columns from colliding with uploaded
/// attribute names.
pub const OBSERVATION_COLUMN_SUFFIX: &str = "_NDVI";

/// One uploaded area-of-interest: its attributes plus its boundary
/// polygon.
///
/// Attribute values are JSON scalars carried over verbatim from the
/// source feature (DBF fields, `GeoJSON` properties, or KML
/// `SimpleData` entries).
#[derive(Debug, Clone)]
pub struct PolygonRecord {
    /// Attribute name to scalar value, in key order.
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Boundary polygon in geographic coordinates (lon/lat).
    pub geometry: geo::Polygon<f64>,
}

impl PolygonRecord {
    /// Creates a record from attributes and a polygon.
    #[must_use]
    pub const fn new(
        attributes: BTreeMap<String, serde_json::Value>,
        geometry: geo::Polygon<f64>,
    ) -> Self {
        Self {
            attributes,
            geometry,
        }
    }

    /// Returns the exterior ring as ordered `(lon, lat)` pairs,
    /// dropping any interior rings (holes).
    ///
    /// The ring is passed through unmodified: no simplification, no
    /// deduplication of the closing point, no winding-order
    /// normalization.
    #[must_use]
    pub fn exterior_ring(&self) -> Vec<(f64, f64)> {
        self.geometry
            .exterior()
            .coords()
            .map(|coord| (coord.x, coord.y))
            .collect()
    }

    /// Looks up an attribute value by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }
}

/// One (date, value) reading of the vegetation index for a polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexObservation {
    /// UTC calendar date of the reading.
    pub date: NaiveDate,
    /// Index value, already divided by [`INDEX_SCALE`].
    pub value: f64,
}

impl IndexObservation {
    /// Builds an observation from one `[timestamp_ms, raw]` response
    /// entry. Returns `None` if the timestamp is outside the
    /// representable date range.
    #[must_use]
    pub fn from_entry(timestamp_ms: i64, raw: f64) -> Option<Self> {
        let date = DateTime::from_timestamp(timestamp_ms / 1000, 0)?.date_naive();
        Some(Self {
            date,
            value: raw / INDEX_SCALE,
        })
    }

    /// Formats the observation date as `DD-MM-YYYY`.
    #[must_use]
    pub fn date_label(&self) -> String {
        self.date.format("%d-%m-%Y").to_string()
    }

    /// Returns the CSV column name for this observation
    /// (`DD-MM-YYYY_NDVI`).
    #[must_use]
    pub fn column_name(&self) -> String {
        format!("{}{OBSERVATION_COLUMN_SUFFIX}", self.date_label())
    }
}

/// One output row: a polygon's carried-over attributes merged with its
/// observation columns.
#[derive(Debug, Clone, Default)]
pub struct EnrichedRow {
    /// Attributes carried over verbatim from the [`PolygonRecord`].
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Observation column name to value, in observation order.
    pub observations: Vec<(String, f64)>,
}

impl EnrichedRow {
    /// Builds a row from a record's attributes and its observations.
    ///
    /// Observations sharing the same formatted date collapse to the
    /// last value seen, keeping the position of the first occurrence.
    #[must_use]
    pub fn from_observations(
        attributes: BTreeMap<String, serde_json::Value>,
        observations: &[IndexObservation],
    ) -> Self {
        let mut columns: Vec<(String, f64)> = Vec::with_capacity(observations.len());

        for obs in observations {
            let name = obs.column_name();
            if let Some(existing) = columns.iter_mut().find(|(col, _)| *col == name) {
                existing.1 = obs.value;
            } else {
                columns.push((name, obs.value));
            }
        }

        Self {
            attributes,
            observations: columns,
        }
    }

    /// Builds a row that has attributes but no observation columns
    /// (used when enrichment soft-fails for a polygon).
    #[must_use]
    pub const fn attributes_only(attributes: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            attributes,
            observations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> geo::Polygon<f64> {
        geo::Polygon::new(
            geo::LineString::from(vec![
                (0.0, 0.0),
                (1.0, 0.0),
                (1.0, 1.0),
                (0.0, 1.0),
                (0.0, 0.0),
            ]),
            vec![],
        )
    }

    #[test]
    fn exterior_ring_preserves_coordinates() {
        let record = PolygonRecord::new(BTreeMap::new(), square());
        let ring = record.exterior_ring();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], (0.0, 0.0));
        assert_eq!(ring[4], (0.0, 0.0));
    }

    #[test]
    fn exterior_ring_drops_holes() {
        let polygon = geo::Polygon::new(
            geo::LineString::from(vec![
                (0.0, 0.0),
                (4.0, 0.0),
                (4.0, 4.0),
                (0.0, 4.0),
                (0.0, 0.0),
            ]),
            vec![geo::LineString::from(vec![
                (1.0, 1.0),
                (2.0, 1.0),
                (2.0, 2.0),
                (1.0, 2.0),
                (1.0, 1.0),
            ])],
        );
        let record = PolygonRecord::new(BTreeMap::new(), polygon);
        let ring = record.exterior_ring();
        assert_eq!(ring.len(), 5);
        assert!(ring.iter().all(|&(x, y)| x == 0.0 || x == 4.0 || y == 0.0 || y == 4.0));
    }

    #[test]
    fn observation_from_epoch_entry() {
        let obs = IndexObservation::from_entry(0, 250.0).unwrap();
        assert_eq!(obs.date_label(), "01-01-1970");
        assert!((obs.value - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn observation_column_name_has_suffix() {
        let obs = IndexObservation::from_entry(0, 125.0).unwrap();
        assert_eq!(obs.column_name(), "01-01-1970_NDVI");
    }

    #[test]
    fn observation_truncates_to_utc_day() {
        // 2023-05-01T23:59:59Z
        let obs = IndexObservation::from_entry(1_682_985_599_000, 200.0).unwrap();
        assert_eq!(obs.date_label(), "01-05-2023");
    }

    #[test]
    fn enriched_row_last_value_wins_per_date() {
        let observations = vec![
            IndexObservation::from_entry(0, 100.0).unwrap(),
            IndexObservation::from_entry(1_000, 200.0).unwrap(),
        ];
        let row = EnrichedRow::from_observations(BTreeMap::new(), &observations);
        assert_eq!(row.observations.len(), 1);
        assert_eq!(row.observations[0].0, "01-01-1970_NDVI");
        assert!((row.observations[0].1 - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn enriched_row_keeps_observation_order() {
        let observations = vec![
            IndexObservation::from_entry(86_400_000, 50.0).unwrap(),
            IndexObservation::from_entry(0, 100.0).unwrap(),
        ];
        let row = EnrichedRow::from_observations(BTreeMap::new(), &observations);
        assert_eq!(row.observations[0].0, "02-01-1970_NDVI");
        assert_eq!(row.observations[1].0, "01-01-1970_NDVI");
    }
}
