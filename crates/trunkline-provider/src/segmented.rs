//! Segmented voice provider assembled from HTTP STT, LLM, and TTS stages.
//!
//! Audio accumulates into utterances before hitting the recognition
//! stage; each flushed utterance runs the full
//! recognize → respond → synthesize pipeline in a spawned task so the
//! audio pump is never blocked on stage HTTP round-trips. Intermediate
//! transcripts are emitted as soon as recognition returns, ahead of the
//! synthesized response audio.

use crate::error::ProviderError;
use crate::event::{ProviderEvent, DEFAULT_EVENT_CAPACITY};
use crate::traits::SegmentedVoiceProvider;
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use trunkline_types::{AudioChunk, ProviderCapabilities, SessionConfig, TranscriptRole};

/// Stage endpoints and tuning for one segmented provider instance.
#[derive(Debug, Clone)]
pub struct SegmentedSettings {
    /// Speech-recognition endpoint; accepts raw audio bytes.
    pub stt_url: String,
    /// Language-model endpoint; accepts a chat completion request.
    pub llm_url: String,
    /// Speech-synthesis endpoint; returns raw audio bytes.
    pub tts_url: String,
    /// API key sent as a bearer token to all three stages.
    pub api_key: String,
    /// Declared capabilities of the assembled pipeline.
    pub capabilities: ProviderCapabilities,
    /// Bytes of audio to accumulate before flushing an utterance to the
    /// recognition stage.
    pub utterance_bytes: usize,
}

/// Conversation turn kept for LLM context.
#[derive(Debug, Clone)]
struct Turn {
    role: &'static str,
    content: String,
}

struct Shared {
    utterance: Mutex<Vec<u8>>,
    history: Mutex<Vec<Turn>>,
}

/// A segmented provider speaking HTTP to its three stages.
pub struct SegmentedHttpProvider {
    settings: SegmentedSettings,
    http: reqwest::Client,
    config: Option<SessionConfig>,
    shared: Arc<Shared>,
    events_tx: Option<mpsc::Sender<ProviderEvent>>,
    events_rx: Option<mpsc::Receiver<ProviderEvent>>,
}

impl SegmentedHttpProvider {
    pub fn new(settings: SegmentedSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
            config: None,
            shared: Arc::new(Shared {
                utterance: Mutex::new(Vec::new()),
                history: Mutex::new(Vec::new()),
            }),
            events_tx: None,
            events_rx: None,
        }
    }

    fn config(&self) -> Result<&SessionConfig, ProviderError> {
        self.config.as_ref().ok_or(ProviderError::NotConnected)
    }

    /// Runs recognize → respond → synthesize for one utterance in a
    /// spawned task. Stage failures become `Error` events at the pump
    /// boundary, never panics.
    fn spawn_pipeline(&self, utterance: Option<Vec<u8>>, direct_text: Option<String>) {
        let Some(events_tx) = self.events_tx.clone() else {
            return;
        };
        let Some(config) = self.config.clone() else {
            return;
        };
        let settings = self.settings.clone();
        let http = self.http.clone();
        let shared = self.shared.clone();

        tokio::spawn(async move {
            let result = run_pipeline(
                &http, &settings, &config, &shared, utterance, direct_text, &events_tx,
            )
            .await;
            if let Err(e) = result {
                let _ = events_tx
                    .send(ProviderEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        });
    }
}

#[async_trait]
impl SegmentedVoiceProvider for SegmentedHttpProvider {
    fn capabilities(&self) -> &ProviderCapabilities {
        &self.settings.capabilities
    }

    async fn connect(&mut self, config: &SessionConfig) -> Result<(), ProviderError> {
        if self.settings.api_key.is_empty() {
            return Err(ProviderError::Unavailable(
                "segmented provider has no api key configured".to_string(),
            ));
        }
        let (events_tx, events_rx) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
        if let Some(prompt) = &config.system_prompt {
            self.shared.history.lock().expect("history lock").push(Turn {
                role: "system",
                content: prompt.clone(),
            });
        }
        self.config = Some(config.clone());
        self.events_tx = Some(events_tx);
        self.events_rx = Some(events_rx);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ProviderError> {
        if let Some(events_tx) = self.events_tx.take() {
            let _ = events_tx
                .send(ProviderEvent::Disconnected { reason: None })
                .await;
        }
        self.config = None;
        Ok(())
    }

    async fn send_audio(&self, chunk: AudioChunk) -> Result<(), ProviderError> {
        let config = self.config()?;
        if chunk.format != config.audio_format || chunk.sample_rate != config.sample_rate {
            return Err(ProviderError::UnsupportedAudioFormat {
                format: chunk.format,
                sample_rate: chunk.sample_rate,
            });
        }

        let flushed = {
            let mut utterance = self.shared.utterance.lock().expect("utterance lock");
            utterance.extend_from_slice(&chunk.data);
            if utterance.len() >= self.settings.utterance_bytes {
                Some(std::mem::take(&mut *utterance))
            } else {
                None
            }
        };

        if let Some(utterance) = flushed {
            self.spawn_pipeline(Some(utterance), None);
        }
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), ProviderError> {
        self.config()?;
        self.spawn_pipeline(None, Some(text.to_string()));
        Ok(())
    }

    fn events(&mut self) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
        self.events_rx.take().ok_or(ProviderError::EventsTaken)
    }

    async fn handle_function_result(
        &self,
        call_id: &str,
        result: serde_json::Value,
    ) -> Result<(), ProviderError> {
        self.config()?;
        self.shared.history.lock().expect("history lock").push(Turn {
            role: "tool",
            content: json!({ "call_id": call_id, "result": result }).to_string(),
        });
        self.spawn_pipeline(None, None);
        Ok(())
    }
}

async fn run_pipeline(
    http: &reqwest::Client,
    settings: &SegmentedSettings,
    config: &SessionConfig,
    shared: &Shared,
    utterance: Option<Vec<u8>>,
    direct_text: Option<String>,
    events_tx: &mpsc::Sender<ProviderEvent>,
) -> Result<(), ProviderError> {
    // Stage 1: recognition, unless text bypassed it.
    let user_text = if let Some(text) = direct_text {
        Some(text)
    } else if let Some(audio) = utterance {
        let transcript = recognize(http, settings, config, audio).await?;
        if transcript.is_empty() {
            return Ok(());
        }
        let _ = events_tx
            .send(ProviderEvent::Transcript {
                role: TranscriptRole::Caller,
                text: transcript.clone(),
                is_final: false,
            })
            .await;
        Some(transcript)
    } else {
        // Function-result continuation: history already updated.
        None
    };

    if let Some(text) = user_text {
        shared.history.lock().expect("history lock").push(Turn {
            role: "user",
            content: text,
        });
    }

    // Stage 2: language model.
    let messages: Vec<serde_json::Value> = shared
        .history
        .lock()
        .expect("history lock")
        .iter()
        .map(|turn| json!({ "role": turn.role, "content": turn.content }))
        .collect();
    let response = http
        .post(&settings.llm_url)
        .bearer_auth(&settings.api_key)
        .json(&json!({
            "model": config.model,
            "messages": messages,
            "temperature": config.temperature,
        }))
        .send()
        .await
        .map_err(|e| ProviderError::Connection(e.to_string()))?
        .error_for_status()
        .map_err(|e| ProviderError::Protocol(e.to_string()))?;
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| ProviderError::Protocol(e.to_string()))?;
    let reply = body
        .get("text")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ProviderError::Protocol("llm response missing text".to_string()))?
        .to_string();

    shared.history.lock().expect("history lock").push(Turn {
        role: "assistant",
        content: reply.clone(),
    });
    let _ = events_tx
        .send(ProviderEvent::Transcript {
            role: TranscriptRole::Assistant,
            text: reply.clone(),
            is_final: true,
        })
        .await;

    // Stage 3: synthesis.
    let audio = http
        .post(&settings.tts_url)
        .bearer_auth(&settings.api_key)
        .json(&json!({
            "text": reply,
            "format": config.audio_format.as_str(),
            "sample_rate": config.sample_rate,
        }))
        .send()
        .await
        .map_err(|e| ProviderError::Connection(e.to_string()))?
        .error_for_status()
        .map_err(|e| ProviderError::Protocol(e.to_string()))?
        .bytes()
        .await
        .map_err(|e| ProviderError::Connection(e.to_string()))?;

    let _ = events_tx
        .send(ProviderEvent::Audio(AudioChunk {
            data: audio.to_vec(),
            format: config.audio_format,
            sample_rate: config.sample_rate,
            timestamp_ms: None,
        }))
        .await;

    Ok(())
}

async fn recognize(
    http: &reqwest::Client,
    settings: &SegmentedSettings,
    config: &SessionConfig,
    audio: Vec<u8>,
) -> Result<String, ProviderError> {
    let response = http
        .post(&settings.stt_url)
        .bearer_auth(&settings.api_key)
        .header("Content-Type", "application/octet-stream")
        .header("X-Audio-Format", config.audio_format.as_str())
        .header("X-Sample-Rate", config.sample_rate.to_string())
        .body(audio)
        .send()
        .await
        .map_err(|e| ProviderError::Connection(e.to_string()))?
        .error_for_status()
        .map_err(|e| ProviderError::Protocol(e.to_string()))?;
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| ProviderError::Protocol(e.to_string()))?;
    Ok(body
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .trim()
        .to_string())
}
