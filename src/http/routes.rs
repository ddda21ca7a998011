use crate::certs::{CertificateStorage, WILDCARD_GROUP};
use crate::error::Error;
use crate::http::http_error::HttpError;
use axum::extract::{Host, State};
use axum::http::uri::{Authority, PathAndQuery};
use axum::http::{header, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const PEM_CONTENT_TYPE: &str = "application/x-pem-file";

#[derive(Clone)]
pub(super) struct AppState {
    pub storage: CertificateStorage,
}

pub(super) fn new(state: AppState, timeout: Duration) -> Router {
    Router::new()
        .route("/healthcheck", get(health_check))
        .route("/server.pem", get(certificate))
        .route("/server.key", get(private_key))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}

/// Once HTTPS is up, the plain HTTP port only sends clients over to it.
pub(super) fn redirect(https_port: u16, timeout: Duration) -> Router {
    Router::new()
        .fallback(redirect_to_https)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(https_port)
}

#[allow(clippy::unused_async)]
async fn redirect_to_https(
    State(https_port): State<u16>,
    Host(host): Host,
    uri: Uri,
) -> impl IntoResponse {
    let path_and_query = uri.path_and_query().map_or("/", PathAndQuery::as_str);
    (
        StatusCode::MOVED_PERMANENTLY,
        [(
            header::LOCATION,
            https_location(&host, path_and_query, https_port),
        )],
    )
}

/// The port a client asked for is dropped; 443 is left implicit.
fn https_location(host: &str, path_and_query: &str, https_port: u16) -> String {
    let host = host
        .parse::<Authority>()
        .map_or_else(|_| host.to_string(), |authority| authority.host().to_string());
    if https_port == 443 {
        format!("https://{host}{path_and_query}")
    } else {
        format!("https://{host}:{https_port}{path_and_query}")
    }
}

#[allow(clippy::unused_async)]
async fn health_check() -> impl IntoResponse {
    Json(json!({"ok":"healthy"}))
}

async fn certificate(State(state): State<AppState>) -> Result<impl IntoResponse, HttpError> {
    download(state.storage.certificate_path(WILDCARD_GROUP)).await
}

async fn private_key(State(state): State<AppState>) -> Result<impl IntoResponse, HttpError> {
    download(state.storage.key_path(WILDCARD_GROUP)).await
}

async fn download(path: PathBuf) -> Result<impl IntoResponse, HttpError> {
    let pem = tokio::fs::read_to_string(&path).await.map_err(|err| {
        tracing::debug!(path = %path.display(), ?err, "can't serve certificate file");
        Error::from(err)
    })?;
    Ok(([(header::CONTENT_TYPE, PEM_CONTENT_TYPE)], pem))
}
