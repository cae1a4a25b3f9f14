//! The two provider behavioral contracts and the tagged wrapper.

use crate::error::ProviderError;
use crate::event::ProviderEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;
use trunkline_types::{AudioChunk, ProviderCapabilities, ProviderStrategy, SessionConfig};

/// An AI backend that accepts and emits audio directly, with no separate
/// STT/TTS stage.
#[async_trait]
pub trait RealtimeEndToEndProvider: Send + Sync {
    /// Static capability descriptor for this provider instance.
    fn capabilities(&self) -> &ProviderCapabilities;

    /// Establishes the provider connection and negotiates the session.
    async fn connect(&mut self, config: &SessionConfig) -> Result<(), ProviderError>;

    /// Tears down the provider connection. Idempotent.
    async fn disconnect(&mut self) -> Result<(), ProviderError>;

    /// Streams one audio chunk to the provider.
    ///
    /// Implementations check the chunk against their capabilities and
    /// fail with [`ProviderError::UnsupportedAudioFormat`] rather than
    /// silently dropping data.
    async fn send_audio(&self, chunk: AudioChunk) -> Result<(), ProviderError>;

    /// Sends a text message into the conversation.
    async fn send_text(&self, text: &str) -> Result<(), ProviderError>;

    /// Takes the event stream: a lazy, indefinite sequence of provider
    /// events terminated only by disconnect or fatal error.
    ///
    /// May be taken exactly once; a second call returns
    /// [`ProviderError::EventsTaken`].
    fn events(&mut self) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError>;

    /// Returns a tool invocation result to the provider.
    async fn handle_function_result(
        &self,
        call_id: &str,
        result: serde_json::Value,
    ) -> Result<(), ProviderError>;
}

/// An AI backend assembled from independent speech-recognition,
/// language-model, and speech-synthesis stages.
///
/// Same surface as [`RealtimeEndToEndProvider`], but `send_audio` targets
/// the speech-recognition stage and `send_text` targets the language
/// model directly; the event stream yields intermediate transcripts in
/// addition to final responses.
#[async_trait]
pub trait SegmentedVoiceProvider: Send + Sync {
    fn capabilities(&self) -> &ProviderCapabilities;

    async fn connect(&mut self, config: &SessionConfig) -> Result<(), ProviderError>;

    async fn disconnect(&mut self) -> Result<(), ProviderError>;

    /// Feeds audio into the speech-recognition stage.
    async fn send_audio(&self, chunk: AudioChunk) -> Result<(), ProviderError>;

    /// Feeds text to the language-model stage directly, bypassing
    /// recognition.
    async fn send_text(&self, text: &str) -> Result<(), ProviderError>;

    fn events(&mut self) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError>;

    async fn handle_function_result(
        &self,
        call_id: &str,
        result: serde_json::Value,
    ) -> Result<(), ProviderError>;
}

/// A provider of either strategy behind one surface.
///
/// The strategy branch happens here, once, at construction; every later
/// call delegates without further branching in caller code.
pub enum VoiceProvider {
    Realtime(Box<dyn RealtimeEndToEndProvider>),
    Segmented(Box<dyn SegmentedVoiceProvider>),
}

impl std::fmt::Debug for VoiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Realtime(_) => f.write_str("VoiceProvider::Realtime"),
            Self::Segmented(_) => f.write_str("VoiceProvider::Segmented"),
        }
    }
}

impl VoiceProvider {
    /// Which contract this provider implements.
    pub fn strategy(&self) -> ProviderStrategy {
        match self {
            Self::Realtime(_) => ProviderStrategy::Realtime,
            Self::Segmented(_) => ProviderStrategy::Segmented,
        }
    }

    pub fn capabilities(&self) -> &ProviderCapabilities {
        match self {
            Self::Realtime(p) => p.capabilities(),
            Self::Segmented(p) => p.capabilities(),
        }
    }

    /// Validates a session config against this provider's capabilities.
    ///
    /// MUST pass before the first `send_audio`; a mismatch is surfaced as
    /// [`ProviderError::UnsupportedAudioFormat`], never a silent drop.
    pub fn validate_config(&self, config: &SessionConfig) -> Result<(), ProviderError> {
        let caps = self.capabilities();
        if !caps.supports(config.audio_format, config.sample_rate) {
            return Err(ProviderError::UnsupportedAudioFormat {
                format: config.audio_format,
                sample_rate: config.sample_rate,
            });
        }
        Ok(())
    }

    pub async fn connect(&mut self, config: &SessionConfig) -> Result<(), ProviderError> {
        match self {
            Self::Realtime(p) => p.connect(config).await,
            Self::Segmented(p) => p.connect(config).await,
        }
    }

    pub async fn disconnect(&mut self) -> Result<(), ProviderError> {
        match self {
            Self::Realtime(p) => p.disconnect().await,
            Self::Segmented(p) => p.disconnect().await,
        }
    }

    pub async fn send_audio(&self, chunk: AudioChunk) -> Result<(), ProviderError> {
        match self {
            Self::Realtime(p) => p.send_audio(chunk).await,
            Self::Segmented(p) => p.send_audio(chunk).await,
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<(), ProviderError> {
        match self {
            Self::Realtime(p) => p.send_text(text).await,
            Self::Segmented(p) => p.send_text(text).await,
        }
    }

    pub fn events(&mut self) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
        match self {
            Self::Realtime(p) => p.events(),
            Self::Segmented(p) => p.events(),
        }
    }

    pub async fn handle_function_result(
        &self,
        call_id: &str,
        result: serde_json::Value,
    ) -> Result<(), ProviderError> {
        match self {
            Self::Realtime(p) => p.handle_function_result(call_id, result).await,
            Self::Segmented(p) => p.handle_function_result(call_id, result).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trunkline_types::{AudioFormat, CostTier};

    struct NullProvider {
        caps: ProviderCapabilities,
    }

    #[async_trait]
    impl RealtimeEndToEndProvider for NullProvider {
        fn capabilities(&self) -> &ProviderCapabilities {
            &self.caps
        }
        async fn connect(&mut self, _config: &SessionConfig) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn send_audio(&self, _chunk: AudioChunk) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn send_text(&self, _text: &str) -> Result<(), ProviderError> {
            Ok(())
        }
        fn events(&mut self) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
            Err(ProviderError::EventsTaken)
        }
        async fn handle_function_result(
            &self,
            _call_id: &str,
            _result: serde_json::Value,
        ) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[test]
    fn validate_config_rejects_capability_mismatch() {
        let provider = VoiceProvider::Realtime(Box::new(NullProvider {
            caps: ProviderCapabilities {
                audio_formats: vec![AudioFormat::Pcm16],
                sample_rates: vec![24_000],
                streaming: true,
                function_calling: false,
                max_context_tokens: 8_192,
                cost_tier: CostTier::Standard,
            },
        }));

        assert!(provider
            .validate_config(&SessionConfig::new("m", 24_000))
            .is_ok());

        let err = provider
            .validate_config(&SessionConfig::new("m", 8_000))
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::UnsupportedAudioFormat {
                format: AudioFormat::Pcm16,
                sample_rate: 8_000
            }
        ));
        assert_eq!(provider.strategy(), ProviderStrategy::Realtime);
    }
}
