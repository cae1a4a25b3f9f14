//! The carrier adapter contract.

use crate::error::TelephonyError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use trunkline_types::{AudioChunk, AudioFormat, CallInfo, CallParams, CallUpdate, TELEPHONY_SAMPLE_RATE};

/// What a webhook endpoint hands to `validate_webhook`: the material the
/// carrier actually signed.
#[derive(Debug)]
pub enum SignedPayload<'a> {
    /// Form-encoded parameters plus the public URL they were posted to
    /// (Twilio signs both).
    Form {
        url: &'a str,
        params: &'a BTreeMap<String, String>,
    },
    /// The raw request body bytes (Telnyx signs these).
    Raw(&'a [u8]),
}

/// Carrier-specific call control, webhook handling, and audio conversion.
///
/// One implementation per carrier. Adapters own [`CallInfo`]; sessions
/// hold only the `call_id` as a lookup key.
#[async_trait]
pub trait TelephonyAdapter: Send + Sync {
    /// Stable lowercase carrier label ("twilio", "telnyx").
    fn carrier(&self) -> &'static str;

    /// Places an outbound call, attaching the media-stream/webhook URLs.
    async fn setup_call(&self, params: &CallParams) -> Result<CallInfo, TelephonyError>;

    /// Accepts an inbound call and begins streaming media to
    /// `stream_url`.
    async fn answer_call(&self, call_id: &str, stream_url: &str) -> Result<(), TelephonyError>;

    /// Issues a hangup. Callers log failures and continue local teardown
    /// regardless — a stuck carrier leg must never wedge the session.
    async fn end_call(&self, call_id: &str) -> Result<(), TelephonyError>;

    /// Verifies a webhook's authenticity. MUST be called before
    /// [`handle_webhook`](Self::handle_webhook) on any externally
    /// reachable endpoint; `false` means the event is discarded with no
    /// side effects.
    ///
    /// Fails closed: a missing signature in strict mode, or any failure
    /// inside verification itself, returns `false`.
    fn validate_webhook(&self, signature: Option<&str>, payload: &SignedPayload<'_>) -> bool;

    /// Dispatches one webhook event to its per-event-type handler.
    ///
    /// Unknown event types are logged and ignored (`None`), never an
    /// error; carriers routinely deliver event families this engine does
    /// not model. Missing payload fields are tolerated the same way.
    fn handle_webhook(&self, event_type: &str, payload: &serde_json::Value) -> Option<CallUpdate>;

    /// The carrier leg's native sample rate, in Hz.
    fn native_rate(&self) -> u32 {
        TELEPHONY_SAMPLE_RATE
    }

    /// The carrier leg's native audio format.
    fn native_format(&self) -> AudioFormat {
        AudioFormat::Ulaw
    }

    /// Converts a carrier-leg chunk to the provider's format and rate.
    ///
    /// The chunk must be in this carrier's native format;
    /// a mismatch raises `UnsupportedAudioFormat`, never a silent
    /// reinterpretation.
    fn convert_audio_from_telephony(
        &self,
        chunk: &AudioChunk,
        target_format: AudioFormat,
        target_rate: u32,
    ) -> Result<AudioChunk, TelephonyError> {
        if chunk.format != self.native_format() {
            return Err(TelephonyError::format_mismatch(
                chunk.format,
                self.native_format(),
            ));
        }
        Ok(trunkline_codec::convert(chunk, target_format, target_rate)?)
    }

    /// Converts a provider-side chunk back to this carrier's native
    /// format and rate.
    fn convert_audio_to_telephony(&self, chunk: &AudioChunk) -> Result<AudioChunk, TelephonyError> {
        Ok(trunkline_codec::convert(
            chunk,
            self.native_format(),
            self.native_rate(),
        )?)
    }
}
