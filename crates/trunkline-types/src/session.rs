//! Session lifecycle state and configuration.

use crate::audio::AudioFormat;
use crate::provider::ProviderStrategy;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a voice session.
///
/// The only legal transitions are:
///
/// ```text
/// idle → connecting → connected → active → disconnecting → disconnected
/// ```
///
/// with `error` reachable from any non-terminal state, and `connecting`
/// re-reachable from `connected`/`active` for the single failover reconnect
/// a session is allowed. `disconnected` and `error` are terminal: once
/// reached, the state never changes again and a new session must be created
/// for any further activity on the same call leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, no provider selected yet.
    Idle,
    /// Provider candidate selected, connect in flight.
    Connecting,
    /// Provider connect returned and capability negotiation succeeded.
    Connected,
    /// First audio or text payload has been sent or received.
    Active,
    /// Teardown initiated; waiting for both legs to confirm.
    Disconnecting,
    /// Both legs confirmed teardown. Terminal.
    Disconnected,
    /// Unrecoverable failure. Terminal.
    Error,
}

impl SessionState {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Terminal states admit nothing. `connected`/`active` may fall back
    /// to `connecting` exactly once for failover; enforcing the
    /// once-per-session limit is the state machine owner's job, not this
    /// table's.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Error) => true,
            (Idle, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Active) => true,
            (Connected | Active, Disconnecting) => true,
            (Connected | Active, Connecting) => true,
            (Connecting, Disconnecting) => true,
            (Disconnecting, Disconnected) => true,
            _ => false,
        }
    }

    /// Returns the lowercase label used in storage and APIs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Active => "active",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    /// Parses a storage label back into a state.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "idle" => Some(Self::Idle),
            "connecting" => Some(Self::Connecting),
            "connected" => Some(Self::Connected),
            "active" => Some(Self::Active),
            "disconnecting" => Some(Self::Disconnecting),
            "disconnected" => Some(Self::Disconnected),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool the provider may call during the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name the provider invokes it by.
    pub name: String,
    /// Human-readable description passed to the provider.
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

/// Immutable configuration supplied at session creation.
///
/// Validated against the selected provider's
/// [`ProviderCapabilities`](crate::ProviderCapabilities) before connect;
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Provider model identifier.
    pub model: String,
    /// Audio format the session exchanges with the provider.
    pub audio_format: AudioFormat,
    /// Sample rate of provider-side audio, in Hz.
    pub sample_rate: u32,
    /// System prompt for the conversation, if any.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Sampling temperature, if the provider supports it.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Tools exposed to the provider for function calling.
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

impl SessionConfig {
    /// A minimal PCM16 config for the given model, useful as a base.
    pub fn new(model: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            model: model.into(),
            audio_format: AudioFormat::Pcm16,
            sample_rate,
            system_prompt: None,
            temperature: None,
            tools: Vec::new(),
        }
    }
}

/// A read-only view of one session, as handed to registry readers,
/// persisted to storage, and returned from status APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Engine-assigned session identifier (UUID v4).
    pub session_id: String,
    /// Name of the provider instance serving this session.
    pub provider_type: String,
    /// Which behavioral contract the provider implements.
    pub strategy: ProviderStrategy,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Reason code recorded when a terminal state was reached.
    pub state_reason: Option<String>,
    /// Carrier call this session is bound to (lookup key only).
    pub call_id: Option<String>,
    /// Session configuration as supplied at creation.
    pub config: SessionConfig,
    /// Creation time, ISO 8601.
    pub created_at: String,
    /// Last state change time, ISO 8601.
    pub updated_at: String,
}
