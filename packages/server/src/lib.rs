#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web server for the NDVI temporal profile export tool.
//!
//! Serves the upload form, accepts polygon collection uploads
//! (shapefile archive, `GeoJSON`, or KML), enriches every polygon with
//! its vegetation-index time series from the external field-profile
//! service, and streams the result back as a wide CSV download.

mod handlers;

use actix_cors::Cors;
use actix_files::Files;
use actix_multipart::form::MultipartFormConfig;
use actix_web::{App, HttpServer, middleware, web};
use ndvi_profile_client::{ProfileClient, ProfileConfig};
use ndvi_profile_formats::ParserRegistry;

/// Upper bound on uploaded file size.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Default number of concurrent profile calls per request.
const DEFAULT_CONCURRENCY: usize = 4;

/// Shared application state.
pub struct AppState {
    /// Registry of upload format parsers, keyed by file extension.
    pub registry: ParserRegistry,
    /// Client for the external field-profile service.
    pub client: ProfileClient,
    /// Bound on concurrent profile calls within one request.
    pub concurrency: usize,
}

/// Starts the profile export server.
///
/// Builds the profile client from environment configuration and starts
/// the Actix-Web HTTP server. This is a regular async function — the
/// caller is responsible for providing the async runtime (e.g. via
/// `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind
/// or encounters a runtime error.
///
/// # Panics
///
/// Panics if the profile HTTP client cannot be constructed.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = ProfileConfig::from_env();
    log::info!(
        "Profile service endpoint: {} (dataset {})",
        config.endpoint,
        config.dataset
    );

    let client = ProfileClient::new(config).expect("Failed to build profile client");

    let concurrency: usize = std::env::var("PROFILE_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CONCURRENCY);

    let state = web::Data::new(AppState {
        registry: ParserRegistry::with_default_parsers(),
        client,
        concurrency,
    });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .app_data(
                MultipartFormConfig::default()
                    .total_limit(MAX_UPLOAD_BYTES)
                    .memory_limit(MAX_UPLOAD_BYTES),
            )
            .service(
                web::scope("/api")
                    .route("/health", web::get().to(handlers::health))
                    .route("/profile", web::post().to(handlers::profile)),
            )
            // Serve frontend static files
            .service(Files::new("/", "app").index_file("index.html"))
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
