use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::task;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::gateway::MessagingGateway;
use crate::store::Stores;

use super::config::ServiceConfig;
use super::webhook::{process_webhook, WebhookError};
use super::BoxError;

#[derive(Clone)]
struct AppState {
    stores: Stores,
    gateway: Arc<MessagingGateway>,
}

pub async fn run_server(
    config: ServiceConfig,
    stores: Stores,
    gateway: Arc<MessagingGateway>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);

    let state = AppState { stores, gateway };

    let app = Router::new()
        .route("/health", get(health))
        .route("/webhook/:tenant_id", post(receive_webhook))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(config.inbound_body_max_bytes));

    info!("notify service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn receive_webhook(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let signature = headers
        .get("x-line-signature")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let stores = state.stores.clone();
    let gateway = state.gateway.clone();
    let result = task::spawn_blocking(move || {
        process_webhook(&stores, &gateway, tenant_id, signature.as_deref(), &body)
    })
    .await;

    match result {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({"status": "ok"}))),
        Ok(Err(WebhookError::UnknownTenant)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "tenant not found"})),
        ),
        Ok(Err(WebhookError::InvalidSignature)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid signature"})),
        ),
        Ok(Err(WebhookError::MalformedPayload)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "malformed payload"})),
        ),
        Ok(Err(WebhookError::Store(err))) => {
            error!("webhook store error for tenant {}: {}", tenant_id, err);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "store unavailable"})),
            )
        }
        Err(err) => {
            error!("webhook task join error: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal"})),
            )
        }
    }
}
