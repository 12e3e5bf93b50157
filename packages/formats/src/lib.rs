#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Upload format parsers and the registry that dispatches between them.
//!
//! Each supported upload format (`zip` shapefile archive, `geojson`,
//! `kml`) implements the [`FormatParser`] trait to turn a raw uploaded
//! byte stream into canonical [`PolygonRecord`]s. The
//! [`ParserRegistry`] selects the parser by the uploaded filename's
//! extension.

pub mod parsers;

mod projection;

use std::ffi::OsStr;
use std::path::Path;

use ndvi_profile_models::PolygonRecord;
use thiserror::Error;

/// Errors that can occur while parsing an uploaded polygon file.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The uploaded filename's extension does not match any registered
    /// parser.
    #[error("Unsupported file format: {extension:?}")]
    UnsupportedFormat {
        /// Extension of the uploaded filename (may be empty).
        extension: String,
    },

    /// The uploaded archive contains no `.shp` member.
    #[error("No shapefile found in the uploaded zip file")]
    NoShapefileFound,

    /// The `GeoJSON` document could not be parsed as a
    /// `FeatureCollection`.
    #[error("Malformed GeoJSON: {message}")]
    MalformedGeoJson {
        /// Description of what went wrong.
        message: String,
    },

    /// The KML document is not well-formed.
    #[error("Malformed KML: {message}")]
    MalformedKml {
        /// Description of what went wrong.
        message: String,
    },

    /// The zip archive could not be read or extracted.
    #[error("Invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The shapefile could not be read.
    #[error("Shapefile error: {message}")]
    Shapefile {
        /// Description of what went wrong.
        message: String,
    },

    /// The shapefile's coordinate reference system could not be
    /// reprojected to geographic coordinates.
    #[error("Projection error: {message}")]
    Projection {
        /// Description of what went wrong.
        message: String,
    },

    /// I/O error (scratch directory allocation, file reads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait implemented by each upload format parser.
///
/// Parsers convert one uploaded byte stream into the list of polygon
/// records it contains. Features that cannot yield a valid polygon are
/// skipped per the format's contract rather than failing the batch.
pub trait FormatParser: Send + Sync {
    /// File extension this parser handles (without the leading dot,
    /// case-sensitive).
    fn extension(&self) -> &'static str;

    /// Parses the raw uploaded bytes into polygon records.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] if the input cannot be parsed per the
    /// format's contract.
    fn parse(&self, bytes: &[u8]) -> Result<Vec<PolygonRecord>, FormatError>;
}

/// Registry mapping recognized file extensions to parsers.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn FormatParser>>,
}

impl ParserRegistry {
    /// Creates a registry with all built-in parsers registered.
    #[must_use]
    pub fn with_default_parsers() -> Self {
        Self {
            parsers: vec![
                Box::new(parsers::shapefile_zip::ShapefileZipParser),
                Box::new(parsers::geojson::GeoJsonParser),
                Box::new(parsers::kml::KmlParser),
            ],
        }
    }

    /// Returns the registered extensions, in registration order.
    #[must_use]
    pub fn extensions(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.extension()).collect()
    }

    /// Looks up the parser for an extension (case-sensitive).
    #[must_use]
    pub fn parser_for(&self, extension: &str) -> Option<&dyn FormatParser> {
        self.parsers
            .iter()
            .find(|parser| parser.extension() == extension)
            .map(|parser| &**parser)
    }

    /// Dispatches the uploaded bytes to the parser matching the
    /// filename's extension.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::UnsupportedFormat`] for unrecognized
    /// extensions, or the matched parser's error.
    pub fn parse(&self, filename: &str, bytes: &[u8]) -> Result<Vec<PolygonRecord>, FormatError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(OsStr::to_str)
            .unwrap_or_default();

        let parser =
            self.parser_for(extension)
                .ok_or_else(|| FormatError::UnsupportedFormat {
                    extension: extension.to_string(),
                })?;

        log::debug!("Dispatching {filename} to the .{extension} parser");
        parser.parse(bytes)
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_default_parsers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_builtin_extensions() {
        let registry = ParserRegistry::with_default_parsers();
        assert_eq!(registry.extensions(), vec!["zip", "geojson", "kml"]);
    }

    #[test]
    fn rejects_unknown_extension() {
        let registry = ParserRegistry::with_default_parsers();
        let err = registry.parse("fields.shp", b"").unwrap_err();
        assert!(matches!(
            err,
            FormatError::UnsupportedFormat { extension } if extension == "shp"
        ));
    }

    #[test]
    fn rejects_missing_extension() {
        let registry = ParserRegistry::with_default_parsers();
        let err = registry.parse("fields", b"").unwrap_err();
        assert!(matches!(
            err,
            FormatError::UnsupportedFormat { extension } if extension.is_empty()
        ));
    }

    #[test]
    fn extension_match_is_case_sensitive() {
        let registry = ParserRegistry::with_default_parsers();
        let err = registry.parse("fields.KML", b"").unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedFormat { .. }));
    }
}
