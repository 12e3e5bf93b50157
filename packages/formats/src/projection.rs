//! Reprojection of shapefile coordinates to geographic WGS84.
//!
//! Shapefiles carry their CRS as an ESRI WKT `.prj` sidecar. A
//! geographic CRS (or a missing sidecar) passes coordinates through
//! untouched; a projected CRS is translated into a PROJ.4 pipeline and
//! inverted with `proj4rs`. Covers the projections that show up in
//! field-boundary exports: Transverse Mercator / UTM, Lambert
//! Conformal Conic, Mercator, and Albers.

use std::path::Path;

use geo::MapCoords;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::FormatError;

/// PROJ.4 string for the geographic WGS84 target (EPSG:4326).
const GEOGRAPHIC_PROJ4: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// A source-to-WGS84 coordinate transform built from a `.prj` WKT.
#[derive(Debug)]
pub(crate) struct Reprojection {
    source: Proj,
    target: Proj,
}

impl Reprojection {
    /// Builds a transform from the `.prj` sidecar path. Returns
    /// `Ok(None)` when no reprojection is needed (missing sidecar or
    /// geographic CRS).
    pub fn from_prj_file(path: &Path) -> Result<Option<Self>, FormatError> {
        if !path.exists() {
            log::debug!("No .prj sidecar at {}; assuming EPSG:4326", path.display());
            return Ok(None);
        }
        let wkt = std::fs::read_to_string(path)?;
        Self::from_wkt(&wkt)
    }

    /// Builds a transform from WKT text. Returns `Ok(None)` for
    /// geographic coordinate systems.
    pub fn from_wkt(wkt: &str) -> Result<Option<Self>, FormatError> {
        let wkt = wkt.trim();
        if !wkt.starts_with("PROJCS") {
            return Ok(None);
        }

        let proj_string = projcs_to_proj4(wkt)?;
        log::debug!("Reprojecting shapefile via {proj_string}");

        let source = Proj::from_proj_string(&proj_string).map_err(|e| FormatError::Projection {
            message: format!("invalid source projection {proj_string:?}: {e}"),
        })?;
        let target =
            Proj::from_proj_string(GEOGRAPHIC_PROJ4).map_err(|e| FormatError::Projection {
                message: format!("invalid target projection: {e}"),
            })?;

        Ok(Some(Self { source, target }))
    }

    /// Reprojects a polygon's coordinates to lon/lat degrees.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Projection`] if any coordinate fails to
    /// transform.
    pub fn apply(&self, polygon: &geo::Polygon<f64>) -> Result<geo::Polygon<f64>, FormatError> {
        // Projected meters in, longlat radians out.
        polygon.try_map_coords(|coord| {
            let mut point = (coord.x, coord.y, 0.0);
            transform(&self.source, &self.target, &mut point).map_err(|e| {
                FormatError::Projection {
                    message: format!("failed to transform ({}, {}): {e}", coord.x, coord.y),
                }
            })?;
            Ok(geo::Coord {
                x: point.0.to_degrees(),
                y: point.1.to_degrees(),
            })
        })
    }
}

/// Translates a `PROJCS` WKT into a PROJ.4 string.
fn projcs_to_proj4(wkt: &str) -> Result<String, FormatError> {
    let projection =
        wkt_quoted_value(wkt, "PROJECTION").ok_or_else(|| FormatError::Projection {
            message: "PROJCS without a PROJECTION clause".to_string(),
        })?;

    let datum = if wkt.contains("NAD83") || wkt.contains("North_American_1983") {
        "NAD83"
    } else {
        "WGS84"
    };

    let lat_0 = wkt_parameter(wkt, "latitude_of_origin").unwrap_or(0.0);
    let lon_0 = wkt_parameter(wkt, "central_meridian").unwrap_or(0.0);
    let k = wkt_parameter(wkt, "scale_factor").unwrap_or(1.0);
    let x_0 = wkt_parameter(wkt, "false_easting").unwrap_or(0.0);
    let y_0 = wkt_parameter(wkt, "false_northing").unwrap_or(0.0);

    let pipeline = if projection.contains("Transverse_Mercator") {
        format!("+proj=tmerc +lat_0={lat_0} +lon_0={lon_0} +k={k} +x_0={x_0} +y_0={y_0}")
    } else if projection.contains("Lambert_Conformal_Conic") {
        let lat_1 = wkt_parameter(wkt, "standard_parallel_1").unwrap_or(lat_0);
        let lat_2 = wkt_parameter(wkt, "standard_parallel_2").unwrap_or(lat_1);
        format!(
            "+proj=lcc +lat_1={lat_1} +lat_2={lat_2} +lat_0={lat_0} +lon_0={lon_0} +x_0={x_0} +y_0={y_0}"
        )
    } else if projection.contains("Albers") {
        let lat_1 = wkt_parameter(wkt, "standard_parallel_1").unwrap_or(lat_0);
        let lat_2 = wkt_parameter(wkt, "standard_parallel_2").unwrap_or(lat_1);
        format!(
            "+proj=aea +lat_1={lat_1} +lat_2={lat_2} +lat_0={lat_0} +lon_0={lon_0} +x_0={x_0} +y_0={y_0}"
        )
    } else if projection.contains("Mercator") {
        format!("+proj=merc +lon_0={lon_0} +k={k} +x_0={x_0} +y_0={y_0}")
    } else {
        return Err(FormatError::Projection {
            message: format!("unsupported projection {projection:?}"),
        });
    };

    Ok(format!("{pipeline} +datum={datum} +units=m +no_defs"))
}

/// Extracts the first quoted value following `keyword[` in the WKT.
fn wkt_quoted_value(wkt: &str, keyword: &str) -> Option<String> {
    let start = wkt.find(&format!("{keyword}["))?;
    let rest = &wkt[start..];
    let open = rest.find('"')?;
    let rest = &rest[open + 1..];
    let close = rest.find('"')?;
    Some(rest[..close].to_string())
}

/// Extracts a named `PARAMETER["name",value]` from the WKT,
/// case-insensitively.
fn wkt_parameter(wkt: &str, name: &str) -> Option<f64> {
    let mut search = wkt;
    while let Some(idx) = search.find("PARAMETER[") {
        let rest = &search[idx + "PARAMETER[".len()..];
        let open = rest.find('"')?;
        let after = &rest[open + 1..];
        let close = after.find('"')?;
        let parameter_name = &after[..close];
        let tail = &after[close + 1..];

        if parameter_name.eq_ignore_ascii_case(name) {
            let comma = tail.find(',')?;
            let value = tail[comma + 1..].split([']', ',']).next()?.trim();
            return value.parse().ok();
        }

        search = tail;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const UTM_43N: &str = r#"PROJCS["WGS_1984_UTM_Zone_43N",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",75.0],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#;

    const GEOGRAPHIC: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

    #[test]
    fn geographic_wkt_needs_no_transform() {
        assert!(Reprojection::from_wkt(GEOGRAPHIC).unwrap().is_none());
    }

    #[test]
    fn extracts_wkt_parameters_case_insensitively() {
        assert_eq!(wkt_parameter(UTM_43N, "central_meridian"), Some(75.0));
        assert_eq!(wkt_parameter(UTM_43N, "false_easting"), Some(500_000.0));
        assert_eq!(wkt_parameter(UTM_43N, "scale_factor"), Some(0.9996));
        assert_eq!(wkt_parameter(UTM_43N, "standard_parallel_1"), None);
    }

    #[test]
    fn utm_origin_maps_to_central_meridian() {
        let transform = Reprojection::from_wkt(UTM_43N).unwrap().unwrap();
        let polygon = geo::Polygon::new(
            geo::LineString::from(vec![
                (500_000.0, 0.0),
                (500_100.0, 0.0),
                (500_100.0, 100.0),
                (500_000.0, 0.0),
            ]),
            vec![],
        );

        let projected = transform.apply(&polygon).unwrap();
        let first = projected.exterior().coords().next().unwrap();
        assert!((first.x - 75.0).abs() < 1e-6);
        assert!(first.y.abs() < 1e-6);
    }

    #[test]
    fn unsupported_projection_is_an_error() {
        let wkt = r#"PROJCS["Odd",PROJECTION["Krovak"],PARAMETER["central_meridian",24.0]]"#;
        let err = Reprojection::from_wkt(wkt).unwrap_err();
        assert!(matches!(err, FormatError::Projection { .. }));
    }
}
