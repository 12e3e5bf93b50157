//! HTTP handler functions for the profile export API.

use actix_multipart::form::MultipartForm;
use actix_multipart::form::bytes::Bytes as UploadedFile;
use actix_multipart::form::text::Text;
use actix_web::{HttpResponse, web};
use futures::stream::{self, StreamExt as _};
use ndvi_profile_client::ProfileClient;
use ndvi_profile_formats::FormatError;
use ndvi_profile_models::{EnrichedRow, PolygonRecord};
use ndvi_profile_output::WideTable;

use crate::AppState;

/// Multipart form for `POST /api/profile`.
#[derive(MultipartForm)]
pub struct UploadForm {
    /// Uploaded polygon file; the filename's extension selects the
    /// parser.
    pub file: UploadedFile,
    /// Optional attribute column forwarded to the profile service.
    pub column_name: Option<Text<String>>,
}

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `POST /api/profile`
///
/// Accepts a multipart polygon collection upload, enriches every
/// polygon with its index time series, and returns the wide CSV as a
/// file download. Per-polygon enrichment failures are soft: the
/// affected row keeps its attributes and simply has no observation
/// columns.
pub async fn profile(
    state: web::Data<AppState>,
    MultipartForm(form): MultipartForm<UploadForm>,
) -> HttpResponse {
    let Some(filename) = form.file.file_name.clone() else {
        return HttpResponse::BadRequest().body("Uploaded file has no filename");
    };

    let column_name = form
        .column_name
        .as_ref()
        .map(|text| text.0.trim().to_string())
        .filter(|name| !name.is_empty());

    log::info!(
        "Processing upload {filename} ({} bytes)",
        form.file.data.len()
    );

    let records = match state.registry.parse(&filename, &form.file.data) {
        Ok(records) => records,
        Err(e) => return parse_error_response(&e),
    };

    log::info!("Parsed {} polygon records from {filename}", records.len());

    if let Some(column) = &column_name {
        if !records
            .iter()
            .any(|record| record.attributes.contains_key(column))
        {
            return HttpResponse::BadRequest()
                .body(format!("Column {column:?} not found in the uploaded data"));
        }
    }

    let rows = enrich_records(
        &state.client,
        &records,
        column_name.as_deref(),
        state.concurrency,
    )
    .await;

    let mut table = WideTable::new();
    for row in rows {
        table.push(row);
    }

    match table.write_csv() {
        Ok(bytes) => HttpResponse::Ok()
            .content_type("text/csv")
            .insert_header(("Content-Disposition", "attachment; filename=\"profile.csv\""))
            .body(bytes),
        Err(e) => {
            log::error!("Failed to serialize CSV output: {e}");
            HttpResponse::InternalServerError().body("Failed to build CSV output")
        }
    }
}

/// Enriches every record through a bounded-concurrency pool. Results
/// are re-assembled by polygon index, so row order matches input order
/// regardless of call completion order.
async fn enrich_records(
    client: &ProfileClient,
    records: &[PolygonRecord],
    column_name: Option<&str>,
    concurrency: usize,
) -> Vec<EnrichedRow> {
    let mut indexed: Vec<(usize, EnrichedRow)> =
        stream::iter(records.iter().enumerate().map(|(index, record)| {
            async move {
                let ring = record.exterior_ring();
                let row = match client.fetch_profile(&ring, column_name).await {
                    Ok(observations) => {
                        EnrichedRow::from_observations(record.attributes.clone(), &observations)
                    }
                    Err(e) => {
                        log::warn!("Profile call failed for polygon {index}: {e}");
                        EnrichedRow::attributes_only(record.attributes.clone())
                    }
                };
                (index, row)
            }
        }))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, row)| row).collect()
}

/// Maps a parse failure onto the HTTP response: bad input is a 400
/// with the error text, everything else a 500.
fn parse_error_response(error: &FormatError) -> HttpResponse {
    log::error!("Failed to parse upload: {error}");
    match error {
        FormatError::Io(_) => {
            HttpResponse::InternalServerError().body("Failed to process the uploaded file")
        }
        other => HttpResponse::BadRequest().body(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use actix_web::http::StatusCode;
    use ndvi_profile_client::ProfileConfig;

    use super::*;

    #[test]
    fn bad_input_maps_to_400() {
        for error in [
            FormatError::UnsupportedFormat {
                extension: "shp".to_string(),
            },
            FormatError::NoShapefileFound,
            FormatError::MalformedGeoJson {
                message: "bad".to_string(),
            },
            FormatError::MalformedKml {
                message: "bad".to_string(),
            },
        ] {
            assert_eq!(
                parse_error_response(&error).status(),
                StatusCode::BAD_REQUEST
            );
        }
    }

    #[test]
    fn io_failure_maps_to_500() {
        let error = FormatError::Io(std::io::Error::other("disk full"));
        assert_eq!(
            parse_error_response(&error).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_web::test]
    async fn soft_failure_keeps_attribute_rows() {
        // Nothing listens on the discard port, so every profile call
        // fails and each polygon falls back to an attributes-only row.
        let client = ProfileClient::new(ProfileConfig {
            endpoint: "http://127.0.0.1:9/run_field_profile".to_string(),
            ..ProfileConfig::default()
        })
        .unwrap();

        let square = geo::Polygon::new(
            geo::LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        let records: Vec<PolygonRecord> = (0..3)
            .map(|i| {
                let mut attributes = BTreeMap::new();
                attributes.insert("FieldID".to_string(), serde_json::json!(format!("F-{i}")));
                PolygonRecord::new(attributes, square.clone())
            })
            .collect();

        let rows = enrich_records(&client, &records, Some("FieldID"), 2).await;

        assert_eq!(rows.len(), 3);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(
                row.attributes.get("FieldID"),
                Some(&serde_json::json!(format!("F-{i}")))
            );
            assert!(row.observations.is_empty());
        }
    }
}
