//! HTTP request handlers.

use crate::server::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use playervault_core::{ImageRef, VaultError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

/// Multipart field carrying the uploaded image.
pub const UPLOAD_FIELD: &str = "file";

/// Error body returned to clients: `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", err);
        } else {
            debug!("Request rejected: {}", err);
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Liveness probe.
pub async fn handle_root() -> &'static str {
    "ciallo!"
}

pub async fn handle_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut body = json!({
        "status": "ok",
        "auth": state.gateway.auth_source(),
    });
    if let Some(registry) = &state.registry {
        let status = registry.lock().await.status().await;
        body["known_players"] = json!(status.known_players);
        body["active_watchers"] = json!(status.active_watchers);
        body["failed_worlds"] = json!(status.failed_worlds);
    }
    Json(body)
}

/// Whether `user` is known.
pub async fn check_user(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<Json<bool>, ApiError> {
    Ok(Json(state.gateway.check_subject(&user).await?))
}

pub async fn list_images(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<Json<Vec<ImageRef>>, ApiError> {
    Ok(Json(state.gateway.list_images(&user).await?))
}

/// Store the first `file` field of a multipart body as a new image.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<ImageRef>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let content = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        return Ok(Json(state.gateway.upload_image(&user, content).await?));
    }
    Err(ApiError::bad_request(format!(
        "missing multipart field {:?}",
        UPLOAD_FIELD
    )))
}

pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path((user, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.gateway.delete_image(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let err = ApiError::from(VaultError::Unauthorized {
            subject: "mallory".into(),
        });
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = ApiError::from(VaultError::store("put", "bucket offline"));
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.message.contains("bucket offline"));

        assert_eq!(ApiError::bad_request("x").status, StatusCode::BAD_REQUEST);

        let err = ApiError::from(VaultError::Validation {
            field: "subject".into(),
            message: "empty".into(),
        });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = ApiError::from(VaultError::Network {
            message: "auth service down".into(),
            source: None,
        });
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);

        let err = ApiError::from(VaultError::Config {
            message: "bad".into(),
        });
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
