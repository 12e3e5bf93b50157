//! Parser implementations for each supported upload format.

pub mod geojson;
pub mod kml;
pub mod shapefile_zip;
