//! Carrier media-stream WebSocket endpoint.
//!
//! Carriers attach one WebSocket per call leg and exchange JSON frames
//! in the media-streams shape: a `start` frame naming the call, then
//! `media` frames carrying base64 u-law audio, then `stop`. This handler
//! is the bridge between that stream and a session's [`CallLeg`]
//! channels — it owns the carrier side of both bounded channels for the
//! leg's lifetime.

use crate::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Extension, Path, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use trunkline_session::CallLeg;
use trunkline_types::{AudioChunk, AudioFormat, TELEPHONY_SAMPLE_RATE};

/// Handler for `GET /media/{carrier}`.
pub async fn media_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(carrier): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_socket(socket, state, carrier))
}

/// Extracts the carrier call identifier from a `start` frame. Twilio
/// names it `callSid`, Telnyx `call_control_id`.
fn start_call_id(frame: &Value) -> Option<String> {
    let start = frame.get("start")?;
    start
        .get("callSid")
        .or_else(|| start.get("call_control_id"))
        .and_then(|id| id.as_str())
        .map(str::to_string)
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>, carrier: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Phase 1: wait for the start frame that names the call leg.
    let call_id = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame: Value = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!(%carrier, error = %e, "ignoring unparseable media frame");
                        continue;
                    }
                };
                match frame.get("event").and_then(|e| e.as_str()) {
                    Some("start") => match start_call_id(&frame) {
                        Some(call_id) => break call_id,
                        None => {
                            tracing::warn!(%carrier, "start frame without call id, closing");
                            return;
                        }
                    },
                    Some("connected") | None => continue,
                    Some(other) => {
                        tracing::debug!(%carrier, event = other, "frame before start, ignoring");
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(%carrier, error = %e, "media socket error before start");
                return;
            }
        }
    };

    // Phase 2: bind the leg to a session.
    let pending = state
        .pending_calls
        .write()
        .expect("pending calls lock poisoned")
        .remove(&call_id);
    let config = match pending {
        Some(pending) if pending.carrier == carrier => pending.config,
        Some(pending) => {
            tracing::warn!(
                %carrier,
                %call_id,
                expected = %pending.carrier,
                "media stream attached through the wrong carrier, closing"
            );
            return;
        }
        None => {
            tracing::debug!(%carrier, %call_id, "media stream for unknown call, using defaults");
            state.session_defaults.to_session_config()
        }
    };

    let (carrier_tx, engine_rx) = mpsc::channel::<AudioChunk>(state.channel_capacity);
    let (engine_tx, mut playback_rx) = mpsc::channel::<AudioChunk>(state.channel_capacity);
    let leg = CallLeg {
        inbound: engine_rx,
        outbound: engine_tx,
        format: AudioFormat::Ulaw,
        sample_rate: TELEPHONY_SAMPLE_RATE,
    };

    let session_id = match state
        .engine
        .start_session(config, Some(call_id.clone()), leg)
        .await
    {
        Ok(session_id) => session_id,
        Err(e) => {
            tracing::error!(%carrier, %call_id, error = %e, "could not start session for media stream");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };
    state
        .call_carriers
        .write()
        .expect("call carriers lock poisoned")
        .insert(call_id.clone(), carrier.clone());
    tracing::info!(%carrier, %call_id, %session_id, "media stream attached");

    // Phase 3: shuttle frames both ways until either side ends.
    loop {
        tokio::select! {
            message = ws_rx.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(_) => continue,
                    };
                    match frame.get("event").and_then(|e| e.as_str()) {
                        Some("media") => {
                            let Some(payload) = frame
                                .get("media")
                                .and_then(|m| m.get("payload"))
                                .and_then(|p| p.as_str())
                            else {
                                continue;
                            };
                            let Ok(data) = BASE64.decode(payload) else {
                                tracing::debug!(%session_id, "undecodable media payload, dropping");
                                continue;
                            };
                            // Bounded send: backpressure from the pump
                            // blocks the read loop rather than buffering.
                            if carrier_tx.send(AudioChunk::ulaw(data)).await.is_err() {
                                break;
                            }
                        }
                        Some("stop") => {
                            state.engine.end_session(&session_id, "carrier_stream_stopped").await;
                            break;
                        }
                        _ => {}
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    state.engine.end_session(&session_id, "carrier_stream_closed").await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%session_id, error = %e, "media socket error");
                    state.engine.end_session(&session_id, "carrier_stream_error").await;
                    break;
                }
            },
            chunk = playback_rx.recv() => match chunk {
                Some(chunk) => {
                    let frame = json!({
                        "event": "media",
                        "media": { "payload": BASE64.encode(&chunk.data) },
                    });
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        state.engine.end_session(&session_id, "carrier_stream_closed").await;
                        break;
                    }
                }
                // The session ended from the other side (hangup webhook,
                // provider disconnect); close the stream.
                None => break,
            },
        }
    }

    state
        .call_carriers
        .write()
        .expect("call carriers lock poisoned")
        .remove(&call_id);
    let _ = ws_tx.send(Message::Close(None)).await;
    tracing::info!(%session_id, "media stream detached");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_frame_accepts_both_carrier_id_shapes() {
        let twilio = json!({ "event": "start", "start": { "callSid": "CA1" } });
        assert_eq!(start_call_id(&twilio).as_deref(), Some("CA1"));

        let telnyx = json!({ "event": "start", "start": { "call_control_id": "v2:abc" } });
        assert_eq!(start_call_id(&telnyx).as_deref(), Some("v2:abc"));

        let bogus = json!({ "event": "start", "start": {} });
        assert_eq!(start_call_id(&bogus), None);
    }
}
