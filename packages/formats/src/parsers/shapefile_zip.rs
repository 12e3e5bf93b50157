//! Zipped shapefile archive parser.
//!
//! Extracts the archive into a scratch directory, loads the first
//! `.shp` member found in a directory walk, converts DBF fields to
//! attributes, and reprojects coordinates to geographic WGS84 when the
//! `.prj` sidecar declares a projected CRS.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ndvi_profile_models::PolygonRecord;
use shapefile::dbase::{FieldValue, Record};
use shapefile::{PolygonRing, Shape};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::projection::Reprojection;
use crate::{FormatError, FormatParser};

/// Parser for uploaded `.zip` shapefile archives.
pub struct ShapefileZipParser;

impl FormatParser for ShapefileZipParser {
    fn extension(&self) -> &'static str {
        "zip"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<PolygonRecord>, FormatError> {
        // Scope-owned scratch directory; removed on drop, error paths
        // included.
        let scratch = tempfile::tempdir()?;

        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        archive.extract(scratch.path())?;

        let shp_path = find_shapefile(scratch.path()).ok_or(FormatError::NoShapefileFound)?;
        log::debug!("Reading shapefile {}", shp_path.display());

        let reprojection = Reprojection::from_prj_file(&shp_path.with_extension("prj"))?;

        let mut reader =
            shapefile::Reader::from_path(&shp_path).map_err(|e| FormatError::Shapefile {
                message: e.to_string(),
            })?;

        let mut records = Vec::new();
        for result in reader.iter_shapes_and_records() {
            let (shape, dbf_record) = result.map_err(|e| FormatError::Shapefile {
                message: e.to_string(),
            })?;

            let mut polygon = shape_to_polygon(shape)?;
            if let Some(transform) = &reprojection {
                polygon = transform.apply(&polygon)?;
            }

            records.push(PolygonRecord::new(dbf_attributes(dbf_record), polygon));
        }

        Ok(records)
    }
}

/// Returns the first `.shp` file encountered in a walk of the
/// extracted tree. Walk order is filesystem-dependent, matching the
/// archive contract.
fn find_shapefile(root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| entry.path().extension().is_some_and(|ext| ext == "shp"))
        .map(walkdir::DirEntry::into_path)
}

/// Coerces a shape into a polygon: first outer ring becomes the
/// exterior, inner rings become holes. Additional outer rings
/// (multi-part polygons) are ignored with a warning.
fn shape_to_polygon(shape: Shape) -> Result<geo::Polygon<f64>, FormatError> {
    let polygon = match shape {
        Shape::Polygon(polygon) => polygon,
        other => {
            return Err(FormatError::Shapefile {
                message: format!("found non-Polygon shape: {}", other.shapetype()),
            });
        }
    };

    let mut exterior: Option<geo::LineString<f64>> = None;
    let mut holes: Vec<geo::LineString<f64>> = Vec::new();

    for ring in polygon.rings() {
        let coords: Vec<geo::Coord<f64>> = ring
            .points()
            .iter()
            .map(|point| geo::Coord {
                x: point.x,
                y: point.y,
            })
            .collect();
        let line = geo::LineString::from(coords);

        match ring {
            PolygonRing::Outer(_) => {
                if exterior.is_none() {
                    exterior = Some(line);
                } else {
                    log::warn!("Ignoring additional outer ring in multi-part polygon");
                }
            }
            PolygonRing::Inner(_) => holes.push(line),
        }
    }

    let exterior = exterior.ok_or_else(|| FormatError::Shapefile {
        message: "polygon record without an outer ring".to_string(),
    })?;

    Ok(geo::Polygon::new(exterior, holes))
}

/// Converts a DBF record into attribute scalars.
fn dbf_attributes(record: Record) -> BTreeMap<String, serde_json::Value> {
    record
        .into_iter()
        .map(|(name, value)| (name, field_to_json(value)))
        .collect()
}

fn field_to_json(value: FieldValue) -> serde_json::Value {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => serde_json::Value::String(s),
        FieldValue::Numeric(Some(n)) => json_number(n),
        FieldValue::Float(Some(f)) => json_number(f64::from(f)),
        FieldValue::Integer(i) => serde_json::Value::from(i),
        FieldValue::Double(d) | FieldValue::Currency(d) => json_number(d),
        FieldValue::Logical(Some(b)) => serde_json::Value::Bool(b),
        FieldValue::Date(Some(date)) => serde_json::Value::String(format!(
            "{:04}-{:02}-{:02}",
            date.year(),
            date.month(),
            date.day()
        )),
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None)
        | FieldValue::Date(None) => serde_json::Value::Null,
        other => {
            log::warn!("Unsupported DBF field type: {other:?}");
            serde_json::Value::Null
        }
    }
}

fn json_number(n: f64) -> serde_json::Value {
    serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn zip_with_files(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, bytes) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn archive_without_shapefile_is_rejected() {
        let bytes = zip_with_files(&[("readme.txt", b"no shapes here")]);
        let err = ShapefileZipParser.parse(&bytes).unwrap_err();
        assert!(matches!(err, FormatError::NoShapefileFound));
    }

    #[test]
    fn invalid_archive_is_rejected() {
        let err = ShapefileZipParser.parse(b"definitely not a zip").unwrap_err();
        assert!(matches!(err, FormatError::Zip(_)));
    }

    #[test]
    fn converts_polygon_shape() {
        let ring = PolygonRing::Outer(vec![
            shapefile::Point::new(0.0, 0.0),
            shapefile::Point::new(0.0, 4.0),
            shapefile::Point::new(4.0, 4.0),
            shapefile::Point::new(4.0, 0.0),
            shapefile::Point::new(0.0, 0.0),
        ]);
        let shape = Shape::Polygon(shapefile::Polygon::new(ring));

        let polygon = shape_to_polygon(shape).unwrap();
        assert!(polygon.exterior().coords().count() >= 4);
        assert!(polygon.interiors().is_empty());
    }

    #[test]
    fn rejects_non_polygon_shape() {
        let shape = Shape::Point(shapefile::Point::new(1.0, 2.0));
        let err = shape_to_polygon(shape).unwrap_err();
        assert!(matches!(err, FormatError::Shapefile { .. }));
    }

    #[test]
    fn maps_dbf_field_values() {
        assert_eq!(
            field_to_json(FieldValue::Character(Some("F-101".to_string()))),
            serde_json::Value::String("F-101".to_string())
        );
        assert_eq!(
            field_to_json(FieldValue::Numeric(Some(2.5))),
            serde_json::json!(2.5)
        );
        assert_eq!(
            field_to_json(FieldValue::Integer(7)),
            serde_json::json!(7)
        );
        assert_eq!(
            field_to_json(FieldValue::Logical(Some(true))),
            serde_json::Value::Bool(true)
        );
        assert_eq!(
            field_to_json(FieldValue::Character(None)),
            serde_json::Value::Null
        );
    }
}
