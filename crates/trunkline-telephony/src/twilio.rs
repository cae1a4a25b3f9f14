//! Twilio adapter: REST call control and status-callback webhooks.

use crate::adapter::{SignedPayload, TelephonyAdapter};
use crate::error::TelephonyError;
use crate::signature;
use async_trait::async_trait;
use trunkline_types::{CallDirection, CallInfo, CallParams, CallState, CallUpdate};

/// Twilio account credentials and webhook policy.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    /// Account SID (`AC…`).
    pub account_sid: String,
    /// Auth token; doubles as the webhook HMAC key.
    pub auth_token: String,
    /// REST API base, overridable for tests.
    pub api_base: String,
    /// When set, webhooks without a signature header are rejected.
    pub strict_signatures: bool,
}

impl TwilioConfig {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            api_base: "https://api.twilio.com".to_string(),
            strict_signatures: true,
        }
    }
}

pub struct TwilioAdapter {
    config: TwilioConfig,
    http: reqwest::Client,
}

impl TwilioAdapter {
    pub fn new(config: TwilioConfig) -> Result<Self, TelephonyError> {
        if config.account_sid.is_empty() || config.auth_token.is_empty() {
            return Err(TelephonyError::CredentialsMissing(
                "twilio account_sid/auth_token".to_string(),
            ));
        }
        Ok(Self {
            config,
            http: reqwest::Client::new(),
        })
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.config.api_base, self.config.account_sid
        )
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.config.api_base, self.config.account_sid, call_sid
        )
    }

    /// TwiML that bridges the answered leg onto a media stream.
    fn stream_twiml(stream_url: &str) -> String {
        format!(
            r#"<Response><Connect><Stream url="{stream_url}"/></Connect></Response>"#
        )
    }
}

/// Maps Twilio's `CallStatus` values onto carrier call states.
fn map_call_status(status: &str) -> Option<CallState> {
    match status {
        "queued" | "initiated" => Some(CallState::Initiated),
        "ringing" => Some(CallState::Ringing),
        "in-progress" | "answered" => Some(CallState::Answered),
        "completed" => Some(CallState::Completed),
        "busy" | "failed" | "no-answer" | "canceled" => Some(CallState::Failed),
        _ => None,
    }
}

#[async_trait]
impl TelephonyAdapter for TwilioAdapter {
    fn carrier(&self) -> &'static str {
        "twilio"
    }

    async fn setup_call(&self, params: &CallParams) -> Result<CallInfo, TelephonyError> {
        let form = [
            ("To", params.to.as_str()),
            ("From", params.from.as_str()),
            ("Url", params.webhook_url.as_str()),
            ("StatusCallback", params.webhook_url.as_str()),
            ("StatusCallbackEvent", "initiated ringing answered completed"),
        ];
        let response = self
            .http
            .post(self.calls_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
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
        let call_sid = body
            .get("sid")
            .and_then(|s| s.as_str())
            .ok_or_else(|| TelephonyError::UnexpectedResponse("missing call sid".to_string()))?;

        tracing::info!(carrier = "twilio", call_id = call_sid, to = %params.to, "outbound call placed");

        Ok(CallInfo {
            call_id: call_sid.to_string(),
            from: params.from.clone(),
            to: params.to.clone(),
            direction: CallDirection::Outbound,
            state: CallState::Initiated,
        })
    }

    async fn answer_call(&self, call_id: &str, stream_url: &str) -> Result<(), TelephonyError> {
        let form = [("Twiml", Self::stream_twiml(stream_url))];
        let response = self
            .http
            .post(self.call_url(call_id))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
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
            .post(self.call_url(call_id))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TelephonyError::Carrier(format!(
                "hangup returned {}",
                response.status()
            )));
        }
        tracing::info!(carrier = "twilio", call_id, "hangup issued");
        Ok(())
    }

    fn validate_webhook(&self, sig: Option<&str>, payload: &SignedPayload<'_>) -> bool {
        let Some(sig) = sig else {
            if self.config.strict_signatures {
                tracing::warn!(carrier = "twilio", "webhook rejected: missing signature");
                return false;
            }
            return true;
        };
        match payload {
            SignedPayload::Form { url, params } => {
                let valid = signature::verify_twilio(&self.config.auth_token, url, params, sig);
                if !valid {
                    tracing::warn!(carrier = "twilio", %url, "webhook signature rejected");
                }
                valid
            }
            SignedPayload::Raw(_) => {
                // Twilio signs url + form params; a raw body here means the
                // endpoint wiring is wrong. Fail closed.
                tracing::warn!(carrier = "twilio", "webhook rejected: unsigned payload shape");
                false
            }
        }
    }

    fn handle_webhook(&self, event_type: &str, payload: &serde_json::Value) -> Option<CallUpdate> {
        let call_id = payload.get("CallSid").and_then(|s| s.as_str())?.to_string();
        match map_call_status(event_type) {
            Some(state) => {
                tracing::debug!(carrier = "twilio", %call_id, status = event_type, "webhook dispatched");
                Some(CallUpdate { call_id, state })
            }
            None => {
                tracing::debug!(carrier = "twilio", %call_id, event_type, "ignoring unknown webhook event");
                None
            }
        }
    }
}
