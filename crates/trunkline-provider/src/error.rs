use thiserror::Error;
use trunkline_types::AudioFormat;

/// Errors produced by provider connections.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No usable credentials or endpoint, or every failover candidate
    /// was exhausted. Fatal for the session.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Transient network failure while connecting or sending. Triggers
    /// the one-shot failover chain, never a blind retry loop.
    #[error("provider connection error: {0}")]
    Connection(String),

    /// Malformed or unexpected provider response. Fatal; the session
    /// moves to `error` and is torn down.
    #[error("provider protocol error: {0}")]
    Protocol(String),

    /// The session config or a chunk does not match the provider's
    /// declared capabilities. Fatal for that send, not for the session.
    #[error("unsupported audio format: {format} at {sample_rate} Hz")]
    UnsupportedAudioFormat {
        format: AudioFormat,
        sample_rate: u32,
    },

    /// An operation that requires a live connection was called before
    /// `connect` or after `disconnect`.
    #[error("provider is not connected")]
    NotConnected,

    /// `events()` was called a second time; the stream is taken once.
    #[error("provider event stream already taken")]
    EventsTaken,
}
