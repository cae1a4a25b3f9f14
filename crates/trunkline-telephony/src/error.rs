use thiserror::Error;
use trunkline_types::AudioFormat;

/// Errors produced by telephony adapters.
#[derive(Debug, Error)]
pub enum TelephonyError {
    /// A webhook failed signature verification. The event is discarded,
    /// never processed, never retried.
    #[error("webhook signature invalid")]
    SignatureInvalid,

    /// The carrier API rejected a call-control request.
    #[error("carrier error: {0}")]
    Carrier(String),

    /// Transient network failure talking to the carrier API.
    #[error("carrier network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A chunk's declared format does not match what this hop converts.
    #[error(transparent)]
    UnsupportedAudioFormat(#[from] trunkline_codec::CodecError),

    /// The adapter is missing required credentials.
    #[error("carrier credentials missing: {0}")]
    CredentialsMissing(String),

    /// A carrier response was missing fields the adapter needs.
    #[error("unexpected carrier response: {0}")]
    UnexpectedResponse(String),
}

impl TelephonyError {
    /// Convenience for format-mismatch failures raised by adapters
    /// themselves rather than the codec layer.
    pub fn format_mismatch(from: AudioFormat, to: AudioFormat) -> Self {
        Self::UnsupportedAudioFormat(trunkline_codec::CodecError::UnsupportedFormat { from, to })
    }
}
