//! Audio frame and wire-format definitions.

use serde::{Deserialize, Serialize};

/// Wire formats an audio hop can produce or consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// Signed 16-bit little-endian linear PCM.
    Pcm16,
    /// G.711 u-law companded 8-bit samples (telephony native).
    Ulaw,
    /// Opus-encoded frames.
    Opus,
    /// MP3-encoded frames.
    Mp3,
}

impl AudioFormat {
    /// Returns the lowercase wire label for this format.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::Ulaw => "ulaw",
            Self::Opus => "opus",
            Self::Mp3 => "mp3",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hop's worth of raw audio.
///
/// Chunks are streamed: produced at one hop, consumed at the next, never
/// retained beyond the hop that produced them. The declared `format` and
/// `sample_rate` must match the consuming endpoint's capability; the codec
/// layer rejects mismatches rather than silently reinterpreting bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChunk {
    /// Raw audio bytes in `format`.
    pub data: Vec<u8>,
    /// Encoding of `data`.
    pub format: AudioFormat,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Capture timestamp in milliseconds, when the producer knows it.
    pub timestamp_ms: Option<u64>,
}

impl AudioChunk {
    /// Builds a linear PCM16 chunk.
    pub fn pcm16(data: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            data,
            format: AudioFormat::Pcm16,
            sample_rate,
            timestamp_ms: None,
        }
    }

    /// Builds a u-law chunk at the telephony-native 8 kHz rate.
    pub fn ulaw(data: Vec<u8>) -> Self {
        Self {
            data,
            format: AudioFormat::Ulaw,
            sample_rate: crate::TELEPHONY_SAMPLE_RATE,
            timestamp_ms: None,
        }
    }

    /// Number of samples this chunk holds, derived from the format.
    ///
    /// Returns `None` for packetized formats (Opus, MP3) where the byte
    /// length does not determine the sample count.
    pub fn sample_count(&self) -> Option<usize> {
        match self.format {
            AudioFormat::Pcm16 => Some(self.data.len() / 2),
            AudioFormat::Ulaw => Some(self.data.len()),
            AudioFormat::Opus | AudioFormat::Mp3 => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_labels_round_trip_serde() {
        for format in [
            AudioFormat::Pcm16,
            AudioFormat::Ulaw,
            AudioFormat::Opus,
            AudioFormat::Mp3,
        ] {
            let json = serde_json::to_string(&format).unwrap();
            assert_eq!(json, format!("\"{}\"", format.as_str()));
            let back: AudioFormat = serde_json::from_str(&json).unwrap();
            assert_eq!(back, format);
        }
    }

    #[test]
    fn sample_count_by_format() {
        assert_eq!(AudioChunk::pcm16(vec![0; 320], 16_000).sample_count(), Some(160));
        assert_eq!(AudioChunk::ulaw(vec![0; 160]).sample_count(), Some(160));
        let opus = AudioChunk {
            data: vec![0; 64],
            format: AudioFormat::Opus,
            sample_rate: 48_000,
            timestamp_ms: None,
        };
        assert_eq!(opus.sample_count(), None);
    }
}
