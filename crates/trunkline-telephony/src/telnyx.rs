//! Telnyx adapter: Call Control API and Ed25519-signed webhooks.

use crate::adapter::{SignedPayload, TelephonyAdapter};
use crate::error::TelephonyError;
use crate::signature;
use async_trait::async_trait;
use serde_json::json;
use trunkline_types::{CallDirection, CallInfo, CallParams, CallState, CallUpdate};

/// Telnyx API credentials and webhook policy.
#[derive(Debug, Clone)]
pub struct TelnyxConfig {
    /// Bearer token for the Call Control API.
    pub api_key: String,
    /// Hex-encoded Ed25519 public key from the Telnyx portal.
    pub public_key: String,
    /// REST API base, overridable for tests.
    pub api_base: String,
    /// When set, webhooks without a signature header are rejected.
    pub strict_signatures: bool,
}

impl TelnyxConfig {
    pub fn new(api_key: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            public_key: public_key.into(),
            api_base: "https://api.telnyx.com".to_string(),
            strict_signatures: true,
        }
    }
}

pub struct TelnyxAdapter {
    config: TelnyxConfig,
    http: reqwest::Client,
}

impl TelnyxAdapter {
    pub fn new(config: TelnyxConfig) -> Result<Self, TelephonyError> {
        if config.api_key.is_empty() {
            return Err(TelephonyError::CredentialsMissing(
                "telnyx api_key".to_string(),
            ));
        }
        Ok(Self {
            config,
            http: reqwest::Client::new(),
        })
    }

    fn action_url(&self, call_id: &str, action: &str) -> String {
        format!("{}/v2/calls/{call_id}/actions/{action}", self.config.api_base)
    }
}

/// Extracts the call_control_id from a Telnyx webhook payload.
fn call_control_id(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("payload")
        .and_then(|p| p.get("call_control_id"))
        .or_else(|| payload.get("call_control_id"))
        .and_then(|id| id.as_str())
        .map(str::to_string)
}

#[async_trait]
impl TelephonyAdapter for TelnyxAdapter {
    fn carrier(&self) -> &'static str {
        "telnyx"
    }

    async fn setup_call(&self, params: &CallParams) -> Result<CallInfo, TelephonyError> {
        let connection_id = params.connection_id.as_deref().ok_or_else(|| {
            TelephonyError::CredentialsMissing("telnyx connection_id".to_string())
        })?;
        let body = json!({
            "connection_id": connection_id,
            "to": params.to,
            "from": params.from,
            "webhook_url": params.webhook_url,
            "stream_url": params.stream_url,
            "stream_track": "both_tracks",
        });
        let response = self
            .http
            .post(format!("{}/v2/calls", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TelephonyError::Carrier(format!(
                "call create returned {status}: {body}"
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let call_id = body
            .get("data")
            .and_then(|d| d.get("call_control_id"))
            .and_then(|id| id.as_str())
            .ok_or_else(|| {
                TelephonyError::UnexpectedResponse("missing call_control_id".to_string())
            })?;

        tracing::info!(carrier = "telnyx", %call_id, to = %params.to, "outbound call placed");

        Ok(CallInfo {
            call_id: call_id.to_string(),
            from: params.from.clone(),
            to: params.to.clone(),
            direction: CallDirection::Outbound,
            state: CallState::Initiated,
        })
    }

    async fn answer_call(&self, call_id: &str, stream_url: &str) -> Result<(), TelephonyError> {
        let body = json!({
            "stream_url": stream_url,
            "stream_track": "both_tracks",
        });
        let response = self
            .http
            .post(self.action_url(call_id, "answer"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TelephonyError::Carrier(format!(
                "answer returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn end_call(&self, call_id: &str) -> Result<(), TelephonyError> {
        let response = self
            .http
            .post(self.action_url(call_id, "hangup"))
            .bearer_auth(&self.config.api_key)
            .json(&json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TelephonyError::Carrier(format!(
                "hangup returned {}",
                response.status()
            )));
        }
        tracing::info!(carrier = "telnyx", call_id, "hangup issued");
        Ok(())
    }

    fn validate_webhook(&self, sig: Option<&str>, payload: &SignedPayload<'_>) -> bool {
        let Some(sig) = sig else {
            if self.config.strict_signatures {
                tracing::warn!(carrier = "telnyx", "webhook rejected: missing signature");
                return false;
            }
            return true;
        };
        match payload {
            SignedPayload::Raw(body) => {
                let valid = signature::verify_telnyx(&self.config.public_key, sig, body);
                if !valid {
                    tracing::warn!(carrier = "telnyx", "webhook signature rejected");
                }
                valid
            }
            SignedPayload::Form { .. } => {
                // Telnyx signs the raw body; form params mean the endpoint
                // wiring is wrong. Fail closed.
                tracing::warn!(carrier = "telnyx", "webhook rejected: unsigned payload shape");
                false
            }
        }
    }

    fn handle_webhook(&self, event_type: &str, payload: &serde_json::Value) -> Option<CallUpdate> {
        let call_id = call_control_id(payload)?;
        let state = match event_type {
            "call.initiated" => CallState::Initiated,
            "call.ringing" => CallState::Ringing,
            "call.answered" => CallState::Answered,
            "call.hangup" => CallState::Completed,
            "call.machine.detection.ended" | "call.speak.ended" | "streaming.started"
            | "streaming.stopped" => {
                tracing::debug!(carrier = "telnyx", %call_id, event_type, "informational event, no state change");
                return None;
            }
            other => {
                tracing::debug!(carrier = "telnyx", %call_id, event_type = other, "ignoring unknown webhook event");
                return None;
            }
        };
        tracing::debug!(carrier = "telnyx", %call_id, event_type, "webhook dispatched");
        Some(CallUpdate { call_id, state })
    }
}
