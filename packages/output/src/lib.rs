#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Wide-table aggregation of enriched polygon rows and CSV output.
//!
//! The table header is the union of every attribute name and every
//! observation column seen across all rows, in order of first
//! appearance. Cells absent from a given row render empty. Rows are
//! never merged: one input polygon is one output row.

use std::collections::BTreeSet;

use ndvi_profile_models::EnrichedRow;
use thiserror::Error;

/// Errors that can occur while serializing the aggregated table.
#[derive(Debug, Error)]
pub enum OutputError {
    /// CSV record serialization failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The CSV writer could not be flushed into the output buffer.
    #[error("CSV flush error: {message}")]
    Flush {
        /// Description of what went wrong.
        message: String,
    },
}

/// Accumulates [`EnrichedRow`]s and serializes them as a wide CSV.
#[derive(Debug, Default)]
pub struct WideTable {
    columns: Vec<String>,
    seen: BTreeSet<String>,
    rows: Vec<EnrichedRow>,
}

impl WideTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of data rows collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row, extending the header with any columns not seen
    /// before (attributes first, then observation columns, each in the
    /// row's own order).
    pub fn push(&mut self, row: EnrichedRow) {
        for name in row.attributes.keys() {
            self.register_column(name);
        }
        for (name, _) in &row.observations {
            self.register_column(name);
        }
        self.rows.push(row);
    }

    fn register_column(&mut self, name: &str) {
        if self.seen.insert(name.to_string()) {
            self.columns.push(name.to_string());
        }
    }

    /// Returns the header columns in first-appearance order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Serializes the table to CSV bytes: header row, then one row per
    /// polygon with blank cells for absent columns.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError`] if serialization or the final flush
    /// fails.
    pub fn write_csv(&self) -> Result<Vec<u8>, OutputError> {
        // Zero-field records are not representable in CSV.
        if self.columns.is_empty() {
            return Ok(Vec::new());
        }

        let mut writer = csv::Writer::from_writer(Vec::new());

        writer.write_record(&self.columns)?;

        for row in &self.rows {
            let record: Vec<String> = self
                .columns
                .iter()
                .map(|column| cell_value(row, column))
                .collect();
            writer.write_record(&record)?;
        }

        writer.into_inner().map_err(|e| OutputError::Flush {
            message: e.to_string(),
        })
    }
}

/// Renders one cell: the attribute scalar, the observation value, or
/// an empty string.
fn cell_value(row: &EnrichedRow, column: &str) -> String {
    if let Some(value) = row.attributes.get(column) {
        return scalar_to_string(value);
    }
    row.observations
        .iter()
        .find(|(name, _)| name == column)
        .map(|(_, value)| value.to_string())
        .unwrap_or_default()
}

/// Formats a JSON scalar for CSV output. Strings render without
/// quotes; null renders empty.
fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
