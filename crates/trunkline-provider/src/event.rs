//! Events a provider connection yields to its session.

use trunkline_types::{AudioChunk, TranscriptRole};

/// Default capacity of the per-session provider event channel.
///
/// Bounded on purpose: a lagging consumer blocks the producer instead of
/// growing an unbounded buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// One item from a provider's indefinite event stream.
///
/// The stream terminates only with [`ProviderEvent::Disconnected`] or by
/// the channel closing on disconnect.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// An audio delta to forward to the telephony leg.
    Audio(AudioChunk),
    /// A transcript fragment (intermediate or final).
    Transcript {
        role: TranscriptRole,
        text: String,
        is_final: bool,
    },
    /// A textual response delta, for providers that emit text alongside
    /// or instead of audio.
    Text(String),
    /// The provider requested a tool invocation.
    FunctionCall {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// The provider closed the connection.
    Disconnected { reason: Option<String> },
    /// The connection failed mid-session. The pump translates this into
    /// a state-machine error (or failover) — it never propagates as a
    /// panic.
    Error { message: String },
}
