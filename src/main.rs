//! Product catalog server binary.
//!
//! Serves per-category product catalogs stored as JSON files, accepts image
//! and audio uploads, and delivers the uploaded files plus the embedded
//! frontend. The main entry point builds the Axum router and runs a single
//! HTTP listener until Ctrl+C or SIGTERM.

mod atomic;
mod catalog;
mod config;
mod error;
mod frontend;
mod health;
mod http;
mod locking;
mod logging;
mod product;
mod products;
mod storage;
mod upload;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, warn};

use crate::catalog::CatalogStore;
use crate::config::Args;
use crate::http::{build_cors_layer, extract_forwarded_ip};
use crate::storage::Storage;
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let mut catalog = CatalogStore::new(PathBuf::from(&args.data_dir));
    if args.unlocked_catalog {
        warn!("catalog locking disabled, concurrent writes may be lost");
        catalog = catalog.unlocked();
    }
    let catalog = Arc::new(catalog);
    let storage = Arc::new(Storage::new(PathBuf::from(&args.uploads_dir)));
    let upload_config = Arc::new(UploadConfig {
        image_max_size: args.image_max_size,
        audio_max_size: args.audio_max_size,
    });
    catalog.ensure_root().await?;
    storage.ensure_dirs().await?;

    let mut app = build_router(catalog, storage, upload_config);
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!(
        data_dir = args.data_dir,
        uploads_dir = args.uploads_dir,
        "🚀 Starting HTTP server at {}",
        addr
    );

    tokio::spawn(shutdown_signal(handle.clone()));
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
}

/// Routes, layers and shared state for the whole API.
fn build_router(
    catalog: Arc<CatalogStore>,
    storage: Arc<Storage>,
    upload_config: Arc<UploadConfig>,
) -> Router {
    let uploads = ServeDir::new(storage.root_path());

    Router::new()
        .route(
            "/api/products/{category}",
            get(products::list_products).post(products::create_product),
        )
        .route(
            "/api/products/{category}/{id}",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::delete_product),
        )
        .route(
            "/api/upload/image",
            post(upload::upload_image).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/upload/audio",
            post(upload::upload_audio).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/health", get(health::health))
        .nest_service("/uploads", uploads)
        .fallback(frontend::serve_frontend)
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let forwarded_ip =
                        extract_forwarded_ip(request.headers()).map(|ip| ip.to_string());
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip().to_string());
                    let client_ip = forwarded_ip
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(catalog))
        .layer(Extension(storage))
        .layer(Extension(upload_config))
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body as AxumBody, Bytes};
    use axum::http::{Method, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tempfile::tempdir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-CATALOG-BOUNDARY";
    const MIB: usize = 1024 * 1024;

    fn make_app() -> (tempfile::TempDir, Router) {
        let temp = tempdir().expect("tempdir");
        let catalog = Arc::new(CatalogStore::new(temp.path().join("data")));
        let storage = Arc::new(Storage::new(temp.path().join("uploads")));
        let upload_config = Arc::new(UploadConfig {
            image_max_size: config::DEFAULT_IMAGE_MAX_SIZE,
            audio_max_size: config::DEFAULT_AUDIO_MAX_SIZE,
        });
        (temp, build_router(catalog, storage, upload_config))
    }

    async fn send(app: &Router, request: Request<AxumBody>) -> (StatusCode, Bytes) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        (status, bytes)
    }

    async fn send_json(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                AxumBody::from(value.to_string())
            }
            None => AxumBody::empty(),
        };
        let (status, bytes) = send(app, builder.body(body).expect("request")).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    fn upload_request(
        uri: &str,
        field: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> Request<AxumBody> {
        let mut body = Vec::with_capacity(data.len() + 256);
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn product_lifecycle_scenario() {
        let (_temp, app) = make_app();

        let (status, created) = send_json(
            &app,
            Method::POST,
            "/api/products/coffee",
            Some(json!({"name": "Latte", "price": 4.5})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["id"], 1);
        assert_eq!(created["name"], "Latte");
        assert_eq!(created["price"], 4.5);
        assert!(created["createdAt"].is_string());
        assert!(created["updatedAt"].is_string());

        let (status, fetched) = send_json(&app, Method::GET, "/api/products/coffee/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let (status, updated) = send_json(
            &app,
            Method::PUT,
            "/api/products/coffee/1",
            Some(json!({"price": 5.0})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["id"], 1);
        assert_eq!(updated["price"], 5.0);
        assert_eq!(updated["name"], "Latte");
        assert_eq!(updated["createdAt"], created["createdAt"]);
        assert_ne!(updated["updatedAt"], created["updatedAt"]);

        let (status, body) = send_json(&app, Method::DELETE, "/api/products/coffee/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"message": "Product deleted successfully"}));

        let (status, body) = send_json(&app, Method::GET, "/api/products/coffee/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn list_of_unknown_category_is_empty_array() {
        let (_temp, app) = make_app();
        let (status, body) = send_json(&app, Method::GET, "/api/products/music", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn update_of_missing_product_is_not_found() {
        let (_temp, app) = make_app();
        let (status, _) = send_json(
            &app,
            Method::PUT,
            "/api/products/coffee/3",
            Some(json!({"name": "Mocha"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejected_product_bodies_are_json_bad_requests() {
        let (_temp, app) = make_app();
        let cases: [(Option<&str>, &str); 4] = [
            (None, r#"{"name":"Latte"}"#),
            (Some("text/plain"), r#"{"name":"Latte"}"#),
            (Some("application/json"), "[1,2]"),
            (Some("application/json"), "{bad"),
        ];
        for (content_type, body) in cases {
            for (method, uri) in [
                (Method::POST, "/api/products/coffee"),
                (Method::PUT, "/api/products/coffee/1"),
            ] {
                let mut builder = Request::builder().method(method.clone()).uri(uri);
                if let Some(content_type) = content_type {
                    builder = builder.header(header::CONTENT_TYPE, content_type);
                }
                let request = builder.body(AxumBody::from(body)).expect("request");
                let (status, bytes) = send(&app, request).await;
                assert_eq!(status, StatusCode::BAD_REQUEST, "{method} {uri} {body}");
                let value: Value = serde_json::from_slice(&bytes)
                    .unwrap_or_else(|_| panic!("non-JSON body for {method} {uri} {body}"));
                assert!(value["error"].is_string());
            }
        }

        let (status, list) = send_json(&app, Method::GET, "/api/products/coffee", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list, json!([]));
    }

    #[tokio::test]
    async fn non_multipart_upload_is_json_bad_request() {
        let (_temp, app) = make_app();
        let (status, body) = send_json(
            &app,
            Method::POST,
            "/api/upload/audio",
            Some(json!({"audio": "track.mp3"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn image_upload_is_served_back_byte_identical() {
        let (_temp, app) = make_app();
        let data: Vec<u8> = (0..9 * MIB).map(|i| (i % 251) as u8).collect();

        let (status, bytes) = send(
            &app,
            upload_request("/api/upload/image", "image", "big.png", "image/png", &data),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        let url = body["url"].as_str().expect("url");
        assert!(url.starts_with("/uploads/images/"));
        assert!(url.ends_with(body["filename"].as_str().expect("filename")));

        let request = Request::builder().uri(url).body(AxumBody::empty()).expect("request");
        let (status, served) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(served.as_ref() == data.as_slice());
    }

    #[tokio::test]
    async fn oversized_image_upload_is_413() {
        let (_temp, app) = make_app();
        let data = vec![0u8; 11 * MIB];
        let (status, _) = send(
            &app,
            upload_request("/api/upload/image", "image", "huge.jpg", "image/jpeg", &data),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn text_file_to_image_endpoint_is_rejected() {
        let (_temp, app) = make_app();
        let (status, bytes) = send(
            &app,
            upload_request("/api/upload/image", "image", "notes.txt", "text/plain", b"hello"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn audio_upload_uses_audio_directory() {
        let (_temp, app) = make_app();
        let (status, bytes) = send(
            &app,
            upload_request("/api/upload/audio", "audio", "song.mp3", "audio/mpeg", b"ID3data"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        assert!(
            body["url"]
                .as_str()
                .expect("url")
                .starts_with("/uploads/audio/")
        );
    }

    #[tokio::test]
    async fn missing_upload_is_404() {
        let (_temp, app) = make_app();
        let request = Request::builder()
            .uri("/uploads/images/nope.png")
            .body(AxumBody::empty())
            .expect("request");
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_ok_with_security_headers() {
        let (_temp, app) = make_app();
        let request = Request::builder()
            .uri("/api/health")
            .body(AxumBody::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["status"], "ok");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn root_serves_main_document() {
        let (_temp, app) = make_app();
        let request = Request::builder().uri("/").body(AxumBody::empty()).expect("request");
        let (status, bytes) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&bytes).contains("<html"));
    }
}
