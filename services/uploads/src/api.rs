use crate::catalog::{ArtifactLinks, Catalog};
use crate::config::ApiConfig;
use crate::credentials::{CredentialIssuer, CredentialRequest, Operation, SignedUrl};
use crate::error::UploadError;
use crate::metadata_store::{FileRecord, MetadataRecorder, NewFileRecord};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<dyn CredentialIssuer>,
    pub recorder: Arc<dyn MetadataRecorder>,
    pub catalog: Catalog,
}

/// Body of `POST /files/credential`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteCredentialRequest {
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// Query of `GET /files/credential`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialQuery {
    pub key: Option<String>,
    pub op: Option<Operation>,
    pub content_type: Option<String>,
}

/// Signed URL response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResponse {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl From<SignedUrl> for CredentialResponse {
    fn from(signed: SignedUrl) -> Self {
        Self {
            url: signed.url,
            expires_at: signed.expires_at,
        }
    }
}

/// Body of `POST /files`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileRequest {
    pub user_id: Option<String>,
    pub file_name: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_key: Option<String>,
    pub s3_url: Option<String>,
    pub content_type: Option<String>,
}

impl CreateFileRequest {
    fn into_new_record(self) -> Result<NewFileRecord, UploadError> {
        Ok(NewFileRecord {
            user_id: required(self.user_id, "userId")?,
            file_name: required(self.file_name, "fileName")?,
            s3_bucket: required(self.s3_bucket, "s3Bucket")?,
            s3_key: required(self.s3_key, "s3Key")?,
            s3_url: required(self.s3_url, "s3Url")?,
            content_type: required(self.content_type, "contentType")?,
        })
    }
}

/// Query of `GET /files/artifacts`
#[derive(Debug, Deserialize)]
pub struct ArtifactQuery {
    pub file_name: Option<String>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: UploadError) -> ApiError {
    (
        err.status_code(),
        Json(ErrorResponse {
            error: err.to_string(),
            code: err.code().to_string(),
        }),
    )
}

/// Extractor rejections surface as 400 `VALIDATION_ERROR`
fn rejection_response(message: String) -> ApiError {
    warn!(error = %message, "Rejected malformed request");
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message,
            code: "VALIDATION_ERROR".to_string(),
        }),
    )
}

fn required(value: Option<String>, field: &'static str) -> Result<String, UploadError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(UploadError::missing(field)),
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/files", get(list_files).post(create_file))
        .route(
            "/files/credential",
            get(issue_credential).post(issue_write_credential),
        )
        .route("/files/artifacts", get(artifact_links))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "upload-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.catalog.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Issue a write credential for an upload
#[instrument(skip(state))]
async fn issue_write_credential(
    State(state): State<AppState>,
    body: Result<Json<WriteCredentialRequest>, JsonRejection>,
) -> Result<Json<CredentialResponse>, ApiError> {
    let Json(body) = body.map_err(|r| rejection_response(r.body_text()))?;
    let key = required(body.filename, "filename").map_err(error_response)?;
    let content_type = required(body.content_type, "contentType").map_err(error_response)?;

    issue(&state, CredentialRequest::write(key, content_type)).await
}

/// Issue a credential by key, read by default
#[instrument(skip(state))]
async fn issue_credential(
    State(state): State<AppState>,
    params: Result<Query<CredentialQuery>, QueryRejection>,
) -> Result<Json<CredentialResponse>, ApiError> {
    let Query(params) = params.map_err(|r| rejection_response(r.body_text()))?;
    let key = required(params.key, "key").map_err(error_response)?;

    let request = CredentialRequest {
        operation: params.op.unwrap_or(Operation::Read),
        key,
        content_type: params.content_type,
    };

    issue(&state, request).await
}

async fn issue(
    state: &AppState,
    request: CredentialRequest,
) -> Result<Json<CredentialResponse>, ApiError> {
    request.validate().map_err(error_response)?;

    let signed = state.issuer.issue(&request).await.map_err(|e| {
        error!(error = %e, key = %request.key, "Failed to issue credential");
        error_response(e)
    })?;

    Ok(Json(signed.into()))
}

/// Record metadata for a completed upload
#[instrument(skip(state, body))]
async fn create_file(
    State(state): State<AppState>,
    body: Result<Json<CreateFileRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FileRecord>), ApiError> {
    let Json(body) = body.map_err(|r| rejection_response(r.body_text()))?;
    let file = body.into_new_record().map_err(|e| {
        warn!(error = %e, "Rejected file metadata");
        error_response(e)
    })?;

    let record = state.recorder.record(&file).await.map_err(|e| {
        error!(error = %e, file_name = %file.file_name, "Failed to save file metadata");
        error_response(e)
    })?;

    Ok((StatusCode::CREATED, Json(record)))
}

/// List all recorded files
#[instrument(skip(state))]
async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileRecord>>, ApiError> {
    let files = state.catalog.list().await.map_err(|e| {
        error!(error = %e, "Failed to list files");
        error_response(e)
    })?;

    Ok(Json(files))
}

/// Derived artifact keys and links for a stored file name
#[instrument(skip(state))]
async fn artifact_links(
    State(state): State<AppState>,
    Query(params): Query<ArtifactQuery>,
) -> Result<Json<ArtifactLinks>, ApiError> {
    let file_name = required(params.file_name, "file_name").map_err(error_response)?;

    Ok(Json(state.catalog.artifacts_for_name(&file_name)))
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting upload API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
