//! Session lifecycle and transcript events delivered to consumers.
//!
//! The business layer (routing, analytics, CRUD backends) observes
//! sessions exclusively through these events — it never mutates session
//! state directly. Events are broadcast in-process and appended to the
//! persisted session event log.

use crate::session::SessionState;
use serde::{Deserialize, Serialize};

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    /// The human on the telephony leg.
    Caller,
    /// The AI provider.
    Assistant,
}

/// One event in a session's observable lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A session was created and registered.
    SessionCreated {
        session_id: String,
        provider_type: String,
        call_id: Option<String>,
    },
    /// The session moved between lifecycle states.
    StateChanged {
        session_id: String,
        from: SessionState,
        to: SessionState,
        reason: Option<String>,
    },
    /// A transcript fragment became available.
    Transcript {
        session_id: String,
        role: TranscriptRole,
        text: String,
        is_final: bool,
    },
    /// The provider requested a tool invocation.
    FunctionCallRequested {
        session_id: String,
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// The session reached a terminal state.
    SessionEnded {
        session_id: String,
        state: SessionState,
        reason: Option<String>,
    },
}

impl SessionEvent {
    /// The session this event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionCreated { session_id, .. }
            | Self::StateChanged { session_id, .. }
            | Self::Transcript { session_id, .. }
            | Self::FunctionCallRequested { session_id, .. }
            | Self::SessionEnded { session_id, .. } => session_id,
        }
    }

    /// Stable event-type label used in the persisted event log.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session.created",
            Self::StateChanged { .. } => "session.state_changed",
            Self::Transcript { .. } => "session.transcript",
            Self::FunctionCallRequested { .. } => "session.function_call",
            Self::SessionEnded { .. } => "session.ended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_with_snake_case_type() {
        let event = SessionEvent::SessionEnded {
            session_id: "s-1".into(),
            state: SessionState::Disconnected,
            reason: Some("caller_hangup".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_ended");
        assert_eq!(event.event_type(), "session.ended");
        assert_eq!(event.session_id(), "s-1");
    }
}
