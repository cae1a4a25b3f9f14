//! Carrier webhook endpoints.
//!
//! Both endpoints preserve the raw request material for signature
//! verification — Twilio signs the URL plus sorted form parameters,
//! Telnyx signs the raw body — and verify before any dispatch. A failed
//! verification discards the event with no side effects.
//!
//! Past the signature gate, handling is permissive: unknown event types
//! and missing fields are logged and acknowledged with 200 so carriers
//! do not retry traffic this engine simply does not model.

use crate::{ApiError, AppState, PendingCall};
use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use trunkline_telephony::{SignedPayload, TelephonyAdapter};
use trunkline_types::{CallState, CallUpdate};

/// Parses an `application/x-www-form-urlencoded` body into sorted
/// key/value pairs — the shape Twilio's signature covers.
fn parse_form(body: &[u8]) -> Result<BTreeMap<String, String>, ApiError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| ApiError::BadRequest("form body is not UTF-8".to_string()))?;
    let mut params = BTreeMap::new();
    for pair in text.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let decode = |s: &str| {
            urlencoding::decode(&s.replace('+', " "))
                .map(|c| c.into_owned())
                .map_err(|_| ApiError::BadRequest("undecodable form parameter".to_string()))
        };
        params.insert(decode(key)?, decode(value)?);
    }
    Ok(params)
}

/// Handler for `POST /webhooks/twilio`.
pub async fn twilio_webhook_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let adapter = state.adapter("twilio")?;
    let params = parse_form(&body)?;
    let url = state.webhook_url("twilio");

    let signature = headers
        .get("X-Twilio-Signature")
        .and_then(|v| v.to_str().ok());
    let payload = SignedPayload::Form {
        url: &url,
        params: &params,
    };
    if !adapter.validate_webhook(signature, &payload) {
        return Err(ApiError::SignatureInvalid);
    }

    let Some(event_type) = params.get("CallStatus").cloned() else {
        tracing::debug!(carrier = "twilio", "webhook without CallStatus, ignoring");
        return Ok(Json(json!({ "ignored": true })));
    };
    let payload_json = Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    );

    // Inbound calls are answered onto the media stream as soon as the
    // carrier reports them.
    let inbound = params
        .get("Direction")
        .is_some_and(|d| d.starts_with("inbound"));
    if inbound && matches!(event_type.as_str(), "ringing" | "initiated" | "queued") {
        if let Some(call_id) = params.get("CallSid") {
            answer_inbound(&state, adapter.as_ref(), "twilio", call_id).await;
        }
    }

    let update = adapter.handle_webhook(&event_type, &payload_json);
    apply_call_update(&state, update).await;
    Ok(Json(json!({ "ok": true })))
}

/// Handler for `POST /webhooks/telnyx`.
pub async fn telnyx_webhook_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let adapter = state.adapter("telnyx")?;

    let signature = headers
        .get("telnyx-signature-ed25519")
        .and_then(|v| v.to_str().ok());
    if !adapter.validate_webhook(signature, &SignedPayload::Raw(&body)) {
        return Err(ApiError::SignatureInvalid);
    }

    let envelope: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("malformed webhook body: {e}")))?;
    let data = envelope.get("data").cloned().unwrap_or(Value::Null);
    let Some(event_type) = data.get("event_type").and_then(|t| t.as_str()).map(String::from)
    else {
        tracing::debug!(carrier = "telnyx", "webhook without event_type, ignoring");
        return Ok(Json(json!({ "ignored": true })));
    };

    let inbound = data
        .get("payload")
        .and_then(|p| p.get("direction"))
        .and_then(|d| d.as_str())
        == Some("incoming");
    if inbound && event_type == "call.initiated" {
        if let Some(call_id) = data
            .get("payload")
            .and_then(|p| p.get("call_control_id"))
            .and_then(|id| id.as_str())
        {
            answer_inbound(&state, adapter.as_ref(), "telnyx", call_id).await;
        }
    }

    let update = adapter.handle_webhook(&event_type, &data);
    apply_call_update(&state, update).await;
    Ok(Json(json!({ "ok": true })))
}

/// Answers an inbound call onto the media stream and registers it as
/// pending so the stream attach can start a session.
async fn answer_inbound(
    state: &Arc<AppState>,
    adapter: &dyn TelephonyAdapter,
    carrier: &str,
    call_id: &str,
) {
    let already_pending = state
        .pending_calls
        .read()
        .expect("pending calls lock poisoned")
        .contains_key(call_id);
    if already_pending || state.engine.registry().find_by_call(call_id).is_some() {
        return;
    }

    let stream_url = state.media_url(carrier);
    if let Err(e) = adapter.answer_call(call_id, &stream_url).await {
        tracing::warn!(carrier, call_id, error = %e, "failed to answer inbound call");
        return;
    }

    state
        .pending_calls
        .write()
        .expect("pending calls lock poisoned")
        .insert(
            call_id.to_string(),
            PendingCall {
                carrier: carrier.to_string(),
                config: state.session_defaults.to_session_config(),
            },
        );
    tracing::info!(carrier, call_id, "inbound call answered onto media stream");
}

/// Applies a dispatched call update to the session it belongs to.
///
/// Duplicate deliveries are idempotent: a hangup for a session that is
/// already down finds nothing to do.
async fn apply_call_update(state: &Arc<AppState>, update: Option<CallUpdate>) {
    let Some(update) = update else {
        return;
    };
    match update.state {
        CallState::Completed | CallState::Failed => {
            state
                .pending_calls
                .write()
                .expect("pending calls lock poisoned")
                .remove(&update.call_id);
            state
                .call_carriers
                .write()
                .expect("call carriers lock poisoned")
                .remove(&update.call_id);
            if let Some(session) = state.engine.registry().find_by_call(&update.call_id) {
                let reason = match update.state {
                    CallState::Failed => "carrier_call_failed",
                    _ => "caller_hangup",
                };
                state.engine.end_session(&session.session_id, reason).await;
            } else {
                tracing::debug!(call_id = %update.call_id, "hangup for unknown session, ignoring");
            }
        }
        CallState::Initiated | CallState::Ringing | CallState::Answered => {
            tracing::debug!(
                call_id = update.call_id,
                state = ?update.state,
                "carrier call progress"
            );
        }
    }
}
