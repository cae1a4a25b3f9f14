use thiserror::Error;
use trunkline_types::AudioFormat;

/// Errors produced by the codec layer.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The requested conversion path is not supported, or the chunk's
    /// declared format does not match what the hop can consume.
    #[error("unsupported audio format conversion: {from} -> {to}")]
    UnsupportedFormat { from: AudioFormat, to: AudioFormat },

    /// A sample rate was zero or otherwise unusable.
    #[error("invalid sample rate: {0} Hz")]
    SampleRate(u32),

    /// PCM16 data whose byte length is not a whole number of samples.
    #[error("malformed PCM16 payload: {0} bytes is not a whole number of samples")]
    MalformedPcm(usize),
}
