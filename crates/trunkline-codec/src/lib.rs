//! Audio codec layer for the Trunkline voice engine.
//!
//! Bridges telephony-native audio (G.711 u-law at 8 kHz) and the engine's
//! canonical representation (signed 16-bit linear PCM at the provider's
//! rate). Conversion is format-checked at every entry point: a chunk whose
//! declared format or rate does not match what the caller asked to convert
//! is rejected with [`CodecError::UnsupportedFormat`], never silently
//! reinterpreted.
//!
//! Resampling is deliberately linear-PCM rate conversion. The telephony
//! leg is narrowband 8 kHz; higher-quality sinc resampling buys nothing
//! over a carrier u-law leg.

mod error;
mod pcm;
mod resample;
mod ulaw;

pub use error::CodecError;
pub use pcm::{pcm_bytes_to_samples, pcm_samples_to_bytes};
pub use resample::resample_linear;
pub use ulaw::{ulaw_decode, ulaw_decode_sample, ulaw_encode, ulaw_encode_sample};

use trunkline_types::{AudioChunk, AudioFormat};

/// Converts a chunk to the target format and sample rate.
///
/// Supported paths are any combination of PCM16 and u-law at any pair of
/// non-zero rates. Packetized formats (Opus, MP3) are not transcoded by
/// this layer and produce [`CodecError::UnsupportedFormat`].
///
/// The `timestamp_ms` of the input, if any, is carried through unchanged.
pub fn convert(
    chunk: &AudioChunk,
    target_format: AudioFormat,
    target_rate: u32,
) -> Result<AudioChunk, CodecError> {
    match (chunk.format, target_format) {
        (AudioFormat::Pcm16 | AudioFormat::Ulaw, AudioFormat::Pcm16 | AudioFormat::Ulaw) => {}
        (from, to) => return Err(CodecError::UnsupportedFormat { from, to }),
    }

    if chunk.format == target_format && chunk.sample_rate == target_rate {
        return Ok(chunk.clone());
    }

    let samples = match chunk.format {
        AudioFormat::Pcm16 => pcm_bytes_to_samples(&chunk.data)?,
        AudioFormat::Ulaw => ulaw_decode(&chunk.data),
        _ => unreachable!("filtered above"),
    };

    let resampled = resample_linear(&samples, chunk.sample_rate, target_rate)?;

    let data = match target_format {
        AudioFormat::Pcm16 => pcm_samples_to_bytes(&resampled),
        AudioFormat::Ulaw => ulaw_encode(&resampled),
        _ => unreachable!("filtered above"),
    };

    Ok(AudioChunk {
        data,
        format: target_format,
        sample_rate: target_rate,
        timestamp_ms: chunk.timestamp_ms,
    })
}
