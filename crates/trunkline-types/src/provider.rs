//! Provider capability descriptors.

use crate::audio::AudioFormat;
use serde::{Deserialize, Serialize};

/// Which behavioral contract a provider implements.
///
/// Callers branch on this exactly once, at session creation, and never
/// again — the two contracts share a surface after that point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStrategy {
    /// Integrated audio↔audio model: accepts and emits audio directly.
    Realtime,
    /// Assembled from independent STT, LLM, and TTS stages.
    Segmented,
}

impl ProviderStrategy {
    /// Returns the lowercase label used in storage and config.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Segmented => "segmented",
        }
    }

    /// Parses a storage label back into a strategy.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "realtime" => Some(Self::Realtime),
            "segmented" => Some(Self::Segmented),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative cost band of a provider, used for operator-facing reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    Economy,
    Standard,
    Premium,
}

/// Static per-provider capability descriptor.
///
/// Computed once per provider configuration and read-only afterwards.
/// Callers MUST check `audio_formats` (and `sample_rates`) before the
/// first audio send; a mismatch is an `UnsupportedAudioFormat` failure,
/// never a silent drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Audio formats the provider accepts and emits.
    pub audio_formats: Vec<AudioFormat>,
    /// Sample rates (Hz) the provider accepts. Empty means any rate.
    #[serde(default)]
    pub sample_rates: Vec<u32>,
    /// Whether the provider streams incremental output.
    pub streaming: bool,
    /// Whether the provider supports function calling.
    pub function_calling: bool,
    /// Maximum conversation context in tokens.
    pub max_context_tokens: u32,
    /// Relative cost band.
    pub cost_tier: CostTier,
}

impl ProviderCapabilities {
    /// Whether the provider accepts this format at this rate.
    pub fn supports(&self, format: AudioFormat, sample_rate: u32) -> bool {
        self.audio_formats.contains(&format)
            && (self.sample_rates.is_empty() || self.sample_rates.contains(&sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> ProviderCapabilities {
        ProviderCapabilities {
            audio_formats: vec![AudioFormat::Pcm16],
            sample_rates: vec![16_000, 24_000],
            streaming: true,
            function_calling: true,
            max_context_tokens: 128_000,
            cost_tier: CostTier::Standard,
        }
    }

    #[test]
    fn supports_checks_format_and_rate() {
        let caps = caps();
        assert!(caps.supports(AudioFormat::Pcm16, 16_000));
        assert!(!caps.supports(AudioFormat::Pcm16, 8_000));
        assert!(!caps.supports(AudioFormat::Ulaw, 16_000));
    }

    #[test]
    fn empty_rate_list_means_any_rate() {
        let mut caps = caps();
        caps.sample_rates.clear();
        assert!(caps.supports(AudioFormat::Pcm16, 8_000));
        assert!(caps.supports(AudioFormat::Pcm16, 48_000));
    }
}
