//! Generic realtime end-to-end provider over WebSocket.
//!
//! Speaks a JSON control protocol with base64 audio payloads: the client
//! sends `session.update` once after connect, then `input_audio.append`
//! frames; the server streams `response.audio.delta`, transcript deltas,
//! and `response.function_call` frames back. Providers exposing an
//! OpenAI-realtime-shaped endpoint map onto this connector with only URL
//! and model configuration.

use crate::error::ProviderError;
use crate::event::{ProviderEvent, DEFAULT_EVENT_CAPACITY};
use crate::traits::RealtimeEndToEndProvider;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use trunkline_types::{AudioChunk, ProviderCapabilities, SessionConfig, TranscriptRole};

/// Connection settings for one realtime provider instance.
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    /// WebSocket endpoint URL (`wss://…`).
    pub url: String,
    /// API key sent as a bearer token on the upgrade request.
    pub api_key: String,
    /// Declared capabilities of the remote endpoint.
    pub capabilities: ProviderCapabilities,
}

/// Outbound frames queued to the writer task.
enum OutboundFrame {
    Json(serde_json::Value),
    Close,
}

/// A realtime end-to-end provider connection over WebSocket.
pub struct RealtimeWsProvider {
    settings: RealtimeSettings,
    audio_format: Option<(trunkline_types::AudioFormat, u32)>,
    outbound: Option<mpsc::Sender<OutboundFrame>>,
    events_rx: Option<mpsc::Receiver<ProviderEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RealtimeWsProvider {
    pub fn new(settings: RealtimeSettings) -> Self {
        Self {
            settings,
            audio_format: None,
            outbound: None,
            events_rx: None,
            tasks: Vec::new(),
        }
    }

    async fn queue(&self, frame: OutboundFrame) -> Result<(), ProviderError> {
        let outbound = self.outbound.as_ref().ok_or(ProviderError::NotConnected)?;
        outbound
            .send(frame)
            .await
            .map_err(|_| ProviderError::Connection("provider writer task gone".to_string()))
    }
}

#[async_trait]
impl RealtimeEndToEndProvider for RealtimeWsProvider {
    fn capabilities(&self) -> &ProviderCapabilities {
        &self.settings.capabilities
    }

    async fn connect(&mut self, config: &SessionConfig) -> Result<(), ProviderError> {
        let mut request = self
            .settings
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ProviderError::Connection(format!("bad endpoint url: {e}")))?;
        let bearer = format!("Bearer {}", self.settings.api_key)
            .parse()
            .map_err(|_| ProviderError::Unavailable("api key is not a valid header".to_string()))?;
        request.headers_mut().insert("Authorization", bearer);

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        // Negotiate the session before any audio flows.
        let update = json!({
            "type": "session.update",
            "session": {
                "model": config.model,
                "audio_format": config.audio_format.as_str(),
                "sample_rate": config.sample_rate,
                "instructions": config.system_prompt,
                "temperature": config.temperature,
                "tools": config.tools,
            },
        });
        sink.send(Message::text(update.to_string()))
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(DEFAULT_EVENT_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<ProviderEvent>(DEFAULT_EVENT_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let result = match frame {
                    OutboundFrame::Json(value) => sink.send(Message::text(value.to_string())).await,
                    OutboundFrame::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    tracing::debug!("realtime provider writer stopping: {e}");
                    break;
                }
            }
        });

        let audio_format = config.audio_format;
        let sample_rate = config.sample_rate;
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = parse_event(&text, audio_format, sample_rate) {
                            let terminal = matches!(
                                event,
                                ProviderEvent::Disconnected { .. } | ProviderEvent::Error { .. }
                            );
                            // Bounded send: a lagging consumer blocks us here
                            // instead of growing a buffer.
                            if events_tx.send(event).await.is_err() || terminal {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        let _ = events_tx.send(ProviderEvent::Disconnected { reason }).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events_tx
                            .send(ProviderEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                        break;
                    }
                }
            }
        });

        self.audio_format = Some((config.audio_format, config.sample_rate));
        self.outbound = Some(outbound_tx);
        self.events_rx = Some(events_rx);
        self.tasks = vec![writer, reader];
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ProviderError> {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(OutboundFrame::Close).await;
        }
        let mut tasks = self.tasks.drain(..);
        if let Some(writer) = tasks.next() {
            // Give the writer a moment to flush the close frame.
            let _ = tokio::time::timeout(std::time::Duration::from_millis(500), writer).await;
        }
        for task in tasks {
            task.abort();
        }
        self.audio_format = None;
        Ok(())
    }

    async fn send_audio(&self, chunk: AudioChunk) -> Result<(), ProviderError> {
        let (format, rate) = self.audio_format.ok_or(ProviderError::NotConnected)?;
        if chunk.format != format || chunk.sample_rate != rate {
            return Err(ProviderError::UnsupportedAudioFormat {
                format: chunk.format,
                sample_rate: chunk.sample_rate,
            });
        }
        self.queue(OutboundFrame::Json(json!({
            "type": "input_audio.append",
            "audio": BASE64.encode(&chunk.data),
        })))
        .await
    }

    async fn send_text(&self, text: &str) -> Result<(), ProviderError> {
        self.queue(OutboundFrame::Json(json!({
            "type": "input_text",
            "text": text,
        })))
        .await
    }

    fn events(&mut self) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
        self.events_rx.take().ok_or(ProviderError::EventsTaken)
    }

    async fn handle_function_result(
        &self,
        call_id: &str,
        result: serde_json::Value,
    ) -> Result<(), ProviderError> {
        self.queue(OutboundFrame::Json(json!({
            "type": "function_call.result",
            "call_id": call_id,
            "result": result,
        })))
        .await
    }
}

/// Maps one inbound JSON frame to a provider event.
///
/// Unknown frame types and frames missing optional fields are logged at
/// debug and skipped — the permissive contract. Only frames that cannot
/// be parsed at all, or audio that cannot be decoded, surface as errors.
fn parse_event(
    text: &str,
    audio_format: trunkline_types::AudioFormat,
    sample_rate: u32,
) -> Option<ProviderEvent> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            return Some(ProviderEvent::Error {
                message: format!("unparseable provider frame: {e}"),
            })
        }
    };

    let frame_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
    match frame_type {
        "response.audio.delta" => {
            let encoded = value.get("audio").and_then(|a| a.as_str())?;
            match BASE64.decode(encoded) {
                Ok(data) => Some(ProviderEvent::Audio(AudioChunk {
                    data,
                    format: audio_format,
                    sample_rate,
                    timestamp_ms: None,
                })),
                Err(e) => Some(ProviderEvent::Error {
                    message: format!("undecodable audio delta: {e}"),
                }),
            }
        }
        "response.audio_transcript.delta" | "response.audio_transcript.done" => {
            Some(ProviderEvent::Transcript {
                role: TranscriptRole::Assistant,
                text: value.get("text")?.as_str()?.to_string(),
                is_final: frame_type.ends_with(".done"),
            })
        }
        "input_audio_transcript.delta" | "input_audio_transcript.done" => {
            Some(ProviderEvent::Transcript {
                role: TranscriptRole::Caller,
                text: value.get("text")?.as_str()?.to_string(),
                is_final: frame_type.ends_with(".done"),
            })
        }
        "response.text.delta" => Some(ProviderEvent::Text(
            value.get("text")?.as_str()?.to_string(),
        )),
        "response.function_call" => Some(ProviderEvent::FunctionCall {
            call_id: value.get("call_id")?.as_str()?.to_string(),
            name: value.get("name")?.as_str()?.to_string(),
            arguments: value.get("arguments").cloned().unwrap_or(serde_json::Value::Null),
        }),
        "session.ended" => Some(ProviderEvent::Disconnected {
            reason: value
                .get("reason")
                .and_then(|r| r.as_str())
                .map(str::to_string),
        }),
        "error" => Some(ProviderEvent::Error {
            message: value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("provider reported an error")
                .to_string(),
        }),
        other => {
            tracing::debug!(frame_type = other, "ignoring unknown provider frame");
            None
        }
    }
}
