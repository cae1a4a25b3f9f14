//! Carrier-side call identity and control types.

use serde::{Deserialize, Serialize};

/// Direction of a call leg from the engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    /// The carrier delivered the call to us.
    Inbound,
    /// We placed the call through the carrier.
    Outbound,
}

/// Carrier call state as reported by webhook events.
///
/// This is the *carrier's* view of the leg, distinct from the engine's
/// [`SessionState`](crate::SessionState). Carriers report these through
/// at-least-once webhook delivery, so consumers must treat repeats as
/// idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Call created, not yet ringing.
    Initiated,
    /// Remote end is ringing.
    Ringing,
    /// Remote end picked up; media can flow.
    Answered,
    /// Call ended normally or was torn down.
    Completed,
    /// Carrier could not complete the call (busy, failed, no answer).
    Failed,
}

/// Carrier-side identity for one call leg.
///
/// Owned by the telephony adapter that created it. Sessions hold only the
/// `call_id` as a lookup key — never this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInfo {
    /// Carrier-assigned call identifier (Twilio CallSid, Telnyx
    /// call_control_id).
    pub call_id: String,
    /// Originating number in E.164 form.
    pub from: String,
    /// Destination number in E.164 form.
    pub to: String,
    /// Leg direction.
    pub direction: CallDirection,
    /// Last carrier-reported state.
    pub state: CallState,
}

/// Parameters for placing an outbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    /// Destination number in E.164 form.
    pub to: String,
    /// Caller ID number in E.164 form.
    pub from: String,
    /// Publicly reachable URL the carrier posts call status webhooks to.
    pub webhook_url: String,
    /// WebSocket URL the carrier connects its media stream to.
    pub stream_url: String,
    /// Carrier-specific application/connection identifier (Telnyx
    /// connection_id). Ignored by carriers that do not use one.
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// The outcome of dispatching one webhook event: which call leg it was
/// about and the carrier state it moved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallUpdate {
    /// The carrier call this event refers to.
    pub call_id: String,
    /// The carrier state the leg transitioned to.
    pub state: CallState,
}
