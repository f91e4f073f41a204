//! HTTP server implementation using Axum.

use crate::handlers::{
    check_user, delete_image, handle_health, handle_root, list_images, upload_image,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get},
    Router,
};
use playervault_core::{ImageGateway, RegistryManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Largest accepted upload body.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Application state shared across handlers.
pub struct AppState {
    pub gateway: ImageGateway,
    /// Present when the registry backend is active.
    pub registry: Option<Arc<Mutex<RegistryManager>>>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/:user/", get(check_user))
        .route("/:user/images", get(list_images).post(upload_image))
        .route("/:user/images/:id", delete(delete_image))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .with_state(state)
}

/// Start the HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use playervault_core::{MemoryBlobStore, RegistryAuth, RegistryStore};
    use serde_json::Value;

    async fn start_test_server(names: &[&str]) -> (SocketAddr, Arc<MemoryBlobStore>) {
        let registry = Arc::new(RegistryStore::new());
        registry.union(names.iter().map(|s| s.to_string())).await;
        let blobs = Arc::new(MemoryBlobStore::new());
        let state = Arc::new(AppState {
            gateway: ImageGateway::new(Arc::new(RegistryAuth::new(registry)), blobs.clone()),
            registry: None,
        });
        let addr = start_server(state, "127.0.0.1", 0).await.unwrap();
        (addr, blobs)
    }

    #[tokio::test]
    async fn test_server_starts() {
        let (addr, _) = start_test_server(&[]).await;
        assert!(addr.port() > 0);

        let body = reqwest::get(format!("http://{}/", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ciallo!");
    }

    #[tokio::test]
    async fn test_health_without_registry() {
        let (addr, _) = start_test_server(&[]).await;
        let body: Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["auth"], "registry");
        assert!(body.get("known_players").is_none());
    }

    #[tokio::test]
    async fn test_check_user() {
        let (addr, _) = start_test_server(&["alice"]).await;

        let known: bool = reqwest::get(format!("http://{}/alice/", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(known);

        let known: bool = reqwest::get(format!("http://{}/bob/", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!known);
    }

    #[tokio::test]
    async fn test_image_lifecycle() {
        let (addr, blobs) = start_test_server(&["alice"]).await;
        let client = reqwest::Client::new();

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(b"fake png".to_vec()).file_name("a.png"),
        );
        let response = client
            .post(format!("http://{}/alice/images", addr))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let image: Value = response.json().await.unwrap();
        let id = image["id"].as_str().unwrap().to_string();
        assert_eq!(
            blobs.get(&format!("alice/{}", id)).await.unwrap().as_ref(),
            b"fake png"
        );

        let listed: Vec<Value> = client
            .get(format!("http://{}/alice/images", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["id"], id.as_str());

        let response = client
            .delete(format!("http://{}/alice/images/{}", addr, id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
        assert!(blobs.get(&format!("alice/{}", id)).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_user_is_404() {
        let (addr, blobs) = start_test_server(&["alice"]).await;
        let response = reqwest::get(format!("http://{}/mallory/images", addr))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("mallory"));
        assert_eq!(blobs.calls(), 0);
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let (addr, _) = start_test_server(&["alice"]).await;
        let form = reqwest::multipart::Form::new().text("note", "no image here");
        let response = reqwest::Client::new()
            .post(format!("http://{}/alice/images", addr))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_store_outage_is_503() {
        let (addr, blobs) = start_test_server(&["alice"]).await;
        blobs.set_unavailable(true);
        let response = reqwest::get(format!("http://{}/alice/images", addr))
            .await
            .unwrap();
        assert_eq!(response.status(), 503);
    }
}
