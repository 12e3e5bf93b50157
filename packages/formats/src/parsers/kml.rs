//! KML parser.
//!
//! Walks every `Placemark` in the document tree (documents, folders,
//! nesting included). A placemark needs a name and a polygon geometry
//! to produce a record; anything else is silently skipped. `SchemaData`
//! blocks contribute one attribute per `SimpleData` child.

use std::collections::BTreeMap;

use kml::types::{Element, Geometry, Placemark};
use kml::Kml;
use ndvi_profile_models::PolygonRecord;

use crate::{FormatError, FormatParser};

/// Attribute key that carries the placemark name.
const NAME_ATTRIBUTE: &str = "Name";

/// Parser for uploaded `.kml` documents.
pub struct KmlParser;

impl FormatParser for KmlParser {
    fn extension(&self) -> &'static str {
        "kml"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<PolygonRecord>, FormatError> {
        let text = std::str::from_utf8(bytes).map_err(|e| FormatError::MalformedKml {
            message: format!("not valid UTF-8: {e}"),
        })?;

        let document: Kml = text.parse().map_err(|e: kml::Error| FormatError::MalformedKml {
            message: e.to_string(),
        })?;

        let mut records = Vec::new();
        collect_placemarks(&document, &mut records);
        Ok(records)
    }
}

/// Recursively walks the KML tree, appending a record for every
/// placemark that yields one.
fn collect_placemarks(node: &Kml, records: &mut Vec<PolygonRecord>) {
    match node {
        Kml::KmlDocument(doc) => {
            for element in &doc.elements {
                collect_placemarks(element, records);
            }
        }
        Kml::Document { elements, .. } => {
            for element in elements {
                collect_placemarks(element, records);
            }
        }
        Kml::Folder { elements, .. } => {
            for element in elements {
                collect_placemarks(element, records);
            }
        }
        Kml::Placemark(placemark) => {
            if let Some(record) = placemark_to_record(placemark) {
                records.push(record);
            }
        }
        _ => {}
    }
}

/// Converts a placemark into a [`PolygonRecord`], or `None` if it is
/// missing a name or a polygon geometry.
fn placemark_to_record(placemark: &Placemark) -> Option<PolygonRecord> {
    let name = placemark.name.as_deref()?;

    let polygon = placemark
        .geometry
        .as_ref()
        .and_then(polygon_from_geometry)?;

    let mut attributes = BTreeMap::new();
    attributes.insert(
        NAME_ATTRIBUTE.to_string(),
        serde_json::Value::String(name.to_string()),
    );
    collect_schema_data(&placemark.children, &mut attributes);

    Some(PolygonRecord::new(attributes, polygon))
}

/// Finds the first polygon in a geometry, descending into
/// `MultiGeometry` containers. Altitude values are dropped.
fn polygon_from_geometry(geometry: &Geometry) -> Option<geo::Polygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => {
            let exterior = ring_to_line_string(&polygon.outer.coords)?;
            let holes: Vec<geo::LineString<f64>> = polygon
                .inner
                .iter()
                .filter_map(|ring| ring_to_line_string(&ring.coords))
                .collect();
            Some(geo::Polygon::new(exterior, holes))
        }
        Geometry::MultiGeometry(multi) => multi.geometries.iter().find_map(polygon_from_geometry),
        _ => None,
    }
}

fn ring_to_line_string(coords: &[kml::types::Coord]) -> Option<geo::LineString<f64>> {
    if coords.len() < 3 {
        return None;
    }
    Some(geo::LineString::from(
        coords
            .iter()
            .map(|coord| geo::Coord {
                x: coord.x,
                y: coord.y,
            })
            .collect::<Vec<_>>(),
    ))
}

/// Walks unparsed placemark children looking for `SchemaData` blocks,
/// copying each `SimpleData` child into the attribute map keyed by its
/// `name` attribute.
fn collect_schema_data(
    elements: &[Element],
    attributes: &mut BTreeMap<String, serde_json::Value>,
) {
    for element in elements {
        if element.name == "SchemaData" {
            for child in &element.children {
                if child.name != "SimpleData" {
                    continue;
                }
                if let (Some(key), Some(value)) = (child.attrs.get("name"), &child.content) {
                    attributes.insert(
                        key.clone(),
                        serde_json::Value::String(value.clone()),
                    );
                }
            }
        } else {
            collect_schema_data(&element.children, attributes);
        }
    }
}
