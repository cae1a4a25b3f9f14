//! Outbound call placement.

use crate::{ApiError, AppState, PendingCall};
use axum::extract::Extension;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use trunkline_types::CallParams;

/// Request body for `POST /api/calls`.
#[derive(Debug, Deserialize)]
pub struct PlaceCallRequest {
    /// Carrier to place the call through ("twilio" or "telnyx").
    pub carrier: String,
    /// Destination number in E.164 form.
    pub to: String,
    /// Caller ID number in E.164 form.
    pub from: String,
    /// Overrides the default session model.
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the default system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Handler for `POST /api/calls`.
///
/// Places the call with the carrier and registers it as pending; the
/// session itself starts when the carrier attaches the media stream.
pub async fn place_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<PlaceCallRequest>,
) -> Result<Json<Value>, ApiError> {
    let adapter = state.adapter(&request.carrier)?;

    let params = CallParams {
        to: request.to,
        from: request.from,
        webhook_url: state.webhook_url(&request.carrier),
        stream_url: state.media_url(&request.carrier),
        connection_id: state.telnyx_connection_id.clone(),
    };
    let call = adapter.setup_call(&params).await?;

    let mut config = state.session_defaults.to_session_config();
    if let Some(model) = request.model {
        config.model = model;
    }
    if let Some(prompt) = request.system_prompt {
        config.system_prompt = Some(prompt);
    }

    state
        .pending_calls
        .write()
        .expect("pending calls lock poisoned")
        .insert(
            call.call_id.clone(),
            PendingCall {
                carrier: request.carrier.clone(),
                config,
            },
        );

    Ok(Json(json!({ "call": call })))
}
