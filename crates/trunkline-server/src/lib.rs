//! Trunkline server library logic.

pub mod api_calls;
pub mod api_sessions;
pub mod api_sse;
pub mod api_webhooks;
pub mod config;
pub mod factory;
pub mod media_ws;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use trunkline_db::DbPool;
use trunkline_session::{SessionError, VoiceEngine};
use trunkline_telephony::TelephonyAdapter;
use trunkline_types::SessionConfig;

/// An accepted carrier call waiting for its media stream to attach.
///
/// Created when we place or answer a call; consumed when the carrier
/// connects the media WebSocket and the session starts.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub carrier: String,
    pub config: SessionConfig,
}

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The session engine.
    pub engine: Arc<VoiceEngine>,
    /// Telephony adapters by carrier label.
    pub adapters: HashMap<String, Arc<dyn TelephonyAdapter>>,
    /// Database connection pool; `None` when the store is unavailable
    /// and the engine runs memory-only.
    pub pool: Option<DbPool>,
    /// Publicly reachable base URL for webhook/stream URLs.
    pub public_url: String,
    /// Defaults for sessions created from inbound calls.
    pub session_defaults: config::SessionDefaults,
    /// Telnyx connection id for outbound calls, if configured.
    pub telnyx_connection_id: Option<String>,
    /// Capacity of per-session audio channels.
    pub channel_capacity: usize,
    /// Accepted calls whose media stream has not attached yet.
    ///
    /// Uses `std::sync::RwLock` intentionally: acquisitions are brief
    /// HashMap operations that never span an `.await` point.
    pub pending_calls: Arc<RwLock<HashMap<String, PendingCall>>>,
    /// Which carrier owns each live call leg, so teardown hangs up
    /// through the right adapter.
    pub call_carriers: Arc<RwLock<HashMap<String, String>>>,
}

impl AppState {
    /// The webhook URL a carrier should post call status to.
    pub fn webhook_url(&self, carrier: &str) -> String {
        format!("{}/webhooks/{carrier}", self.public_url)
    }

    /// The WebSocket URL a carrier should stream call media to.
    pub fn media_url(&self, carrier: &str) -> String {
        let ws_base = self
            .public_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{ws_base}/media/{carrier}")
    }

    pub fn adapter(&self, carrier: &str) -> Result<Arc<dyn TelephonyAdapter>, ApiError> {
        self.adapters
            .get(carrier)
            .cloned()
            .ok_or_else(|| ApiError::UnknownCarrier(carrier.to_string()))
    }

    /// The adapter owning a live call leg, if it is known.
    pub fn adapter_for_call(&self, call_id: &str) -> Option<Arc<dyn TelephonyAdapter>> {
        let carrier = self
            .call_carriers
            .read()
            .expect("call carriers lock poisoned")
            .get(call_id)
            .cloned()?;
        self.adapters.get(&carrier).cloned()
    }
}

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown carrier: {0}")]
    UnknownCarrier(String),
    #[error("webhook signature invalid")]
    SignatureInvalid,
    #[error("malformed request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("carrier error: {0}")]
    Telephony(#[from] trunkline_telephony::TelephonyError),
    #[error("store error: {0}")]
    Store(#[from] trunkline_db::StoreError),
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status = match &self {
            ApiError::UnknownCarrier(_) => StatusCode::NOT_FOUND,
            ApiError::SignatureInvalid => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Session(SessionError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Session(SessionError::ProviderUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Session(_) => StatusCode::CONFLICT,
            ApiError::Telephony(_) => StatusCode::BAD_GATEWAY,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Health check handler.
///
/// Reports store degradation so operators see memory-only mode without
/// digging through logs.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "store_degraded": state.engine.registry().is_degraded(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/twilio", post(api_webhooks::twilio_webhook_handler))
        .route("/webhooks/telnyx", post(api_webhooks::telnyx_webhook_handler))
        .route("/api/calls", post(api_calls::place_call_handler))
        .route("/api/sessions", get(api_sessions::list_sessions_handler))
        .route(
            "/api/sessions/{id}",
            get(api_sessions::get_session_handler).delete(api_sessions::end_session_handler),
        )
        .route(
            "/api/sessions/{id}/events",
            get(api_sessions::session_events_handler),
        )
        .route("/api/providers", get(api_sessions::list_providers_handler))
        .route("/api/events", get(api_sse::session_events_stream_handler))
        .route("/media/{carrier}", get(media_ws::media_stream_handler))
        .layer(Extension(state))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
