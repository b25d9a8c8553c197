use crate::domain::model::{
    BatchPredictionResponse, ErrorResponse, PredictionResponse, UploadedFile,
};
use crate::domain::ports::PredictionService;
use crate::utils::error::{Result, ServeError};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Multipart field carrying the image for `POST /predict`.
pub const SINGLE_FILE_FIELD: &str = "file";
/// Repeatable multipart field for `POST /predict_batch`.
pub const BATCH_FILES_FIELD: &str = "files";

#[derive(Clone)]
pub struct AppState {
    service: Arc<dyn PredictionService>,
}

pub fn router(service: Arc<dyn PredictionService>, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/predict_batch", post(predict_batch))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(AppState { service })
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn predict(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>> {
    let multipart = multipart.map_err(|e| ServeError::Multipart {
        message: e.body_text(),
    })?;

    let file = read_files(multipart, SINGLE_FILE_FIELD)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ServeError::MissingField {
            field: SINGLE_FILE_FIELD.to_string(),
        })?;

    let prediction = state.service.predict_one(file).await?;
    Ok(Json(PredictionResponse { prediction }))
}

async fn predict_batch(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchPredictionResponse>> {
    let multipart = multipart.map_err(|e| ServeError::Multipart {
        message: e.body_text(),
    })?;

    let files = read_files(multipart, BATCH_FILES_FIELD).await?;
    let predictions = state.service.predict_batch(files).await?;
    Ok(Json(BatchPredictionResponse { predictions }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Collect every part named `field_name`; other fields are ignored.
async fn read_files(mut multipart: Multipart, field_name: &str) -> Result<Vec<UploadedFile>> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(field_name) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;
        tracing::debug!("Received {} ({} bytes)", filename, bytes.len());
        files.push(UploadedFile::new(filename, bytes.to_vec()));
    }
    Ok(files)
}

fn multipart_error(e: MultipartError) -> ServeError {
    ServeError::Multipart {
        message: e.body_text(),
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                "❌ Request failed: {} (Category: {:?}, Severity: {:?})",
                self,
                self.category(),
                self.severity()
            );
        } else {
            tracing::warn!("Rejected request: {}", self);
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
