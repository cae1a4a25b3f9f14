//! Builds provider connections from configuration.

use crate::config::ProviderSpec;
use async_trait::async_trait;
use std::collections::HashMap;
use trunkline_health::ProviderEntry;
use trunkline_provider::{
    ProviderError, RealtimeSettings, RealtimeWsProvider, SegmentedHttpProvider, SegmentedSettings,
    VoiceProvider,
};
use trunkline_session::ProviderFactory;
use trunkline_types::ProviderStrategy;

/// Bytes of provider-rate audio to accumulate per recognition utterance
/// in segmented pipelines (about one second of PCM16 at 16 kHz).
const DEFAULT_UTTERANCE_BYTES: usize = 32_000;

/// Resolves health-registry candidate names to configured connections.
pub struct ConfiguredProviderFactory {
    specs: HashMap<String, ProviderSpec>,
}

impl ConfiguredProviderFactory {
    pub fn new(specs: Vec<ProviderSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }
}

#[async_trait]
impl ProviderFactory for ConfiguredProviderFactory {
    async fn build(&self, entry: &ProviderEntry) -> Result<VoiceProvider, ProviderError> {
        let spec = self.specs.get(&entry.name).ok_or_else(|| {
            ProviderError::Unavailable(format!("no configuration for provider '{}'", entry.name))
        })?;

        match spec.strategy {
            ProviderStrategy::Realtime => {
                let url = spec.url.clone().ok_or_else(|| {
                    ProviderError::Unavailable(format!(
                        "realtime provider '{}' has no endpoint url",
                        spec.name
                    ))
                })?;
                Ok(VoiceProvider::Realtime(Box::new(RealtimeWsProvider::new(
                    RealtimeSettings {
                        url,
                        api_key: spec.api_key.clone(),
                        capabilities: spec.capabilities(),
                    },
                ))))
            }
            ProviderStrategy::Segmented => {
                let (stt_url, llm_url, tts_url) = match (&spec.stt_url, &spec.llm_url, &spec.tts_url)
                {
                    (Some(stt), Some(llm), Some(tts)) => {
                        (stt.clone(), llm.clone(), tts.clone())
                    }
                    _ => {
                        return Err(ProviderError::Unavailable(format!(
                            "segmented provider '{}' is missing stage urls",
                            spec.name
                        )))
                    }
                };
                Ok(VoiceProvider::Segmented(Box::new(
                    SegmentedHttpProvider::new(SegmentedSettings {
                        stt_url,
                        llm_url,
                        tts_url,
                        api_key: spec.api_key.clone(),
                        capabilities: spec.capabilities(),
                        utterance_bytes: DEFAULT_UTTERANCE_BYTES,
                    }),
                )))
            }
        }
    }
}

/// Derives the health-registry entry for a configured provider.
pub fn registry_entry(spec: &ProviderSpec) -> ProviderEntry {
    ProviderEntry {
        name: spec.name.clone(),
        kind: spec.kind.clone(),
        strategy: spec.strategy,
        priority: spec.priority,
        is_enabled: spec.enabled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trunkline_types::{AudioFormat, CostTier};

    fn spec(strategy: ProviderStrategy) -> ProviderSpec {
        ProviderSpec {
            name: "p1".into(),
            kind: "test".into(),
            strategy,
            priority: 1,
            enabled: true,
            url: Some("wss://example.com/rt".into()),
            stt_url: None,
            llm_url: None,
            tts_url: None,
            api_key: "k".into(),
            audio_formats: vec![AudioFormat::Pcm16],
            sample_rates: vec![],
            function_calling: true,
            max_context_tokens: 1_000,
            cost_tier: CostTier::Standard,
        }
    }

    #[tokio::test]
    async fn builds_realtime_provider_from_spec() {
        let factory = ConfiguredProviderFactory::new(vec![spec(ProviderStrategy::Realtime)]);
        let provider = factory.build(&registry_entry(&spec(ProviderStrategy::Realtime))).await;
        assert!(matches!(provider, Ok(VoiceProvider::Realtime(_))));
    }

    #[tokio::test]
    async fn segmented_spec_without_stage_urls_is_rejected() {
        let factory = ConfiguredProviderFactory::new(vec![spec(ProviderStrategy::Segmented)]);
        let err = factory
            .build(&registry_entry(&spec(ProviderStrategy::Segmented)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unknown_name_is_rejected() {
        let factory = ConfiguredProviderFactory::new(vec![]);
        let err = factory
            .build(&registry_entry(&spec(ProviderStrategy::Realtime)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
