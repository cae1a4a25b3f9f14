//! The voice engine: provider selection, the two per-session pumps, and
//! bounded teardown.

use crate::error::SessionError;
use crate::registry::SessionRegistry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use trunkline_health::{HealthRegistry, ProviderEntry};
use trunkline_provider::{ProviderError, ProviderEvent, VoiceProvider};
use trunkline_types::{AudioChunk, AudioFormat, SessionConfig, SessionEvent, SessionState};

/// Builds a provider connection for a registered instance.
///
/// Injected so tests (and alternative deployments) control exactly what
/// a candidate name resolves to.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn build(&self, entry: &ProviderEntry) -> Result<VoiceProvider, ProviderError>;
}

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on pump cancellation and provider release at
    /// teardown. Each leg is released independently — an unresponsive
    /// telephony leg never delays the provider release, and vice versa.
    pub teardown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

/// The engine's handle to one telephony call leg: bounded channels to
/// and from whatever owns the carrier media stream, plus the leg's
/// native audio shape.
pub struct CallLeg {
    /// Frames arriving from the carrier.
    pub inbound: mpsc::Receiver<AudioChunk>,
    /// Frames to play back to the carrier.
    pub outbound: mpsc::Sender<AudioChunk>,
    /// The leg's native format (u-law for PSTN carriers).
    pub format: AudioFormat,
    /// The leg's native sample rate in Hz.
    pub sample_rate: u32,
}

/// Live per-session state the engine keeps outside the registry.
///
/// The provider sits in a shared cell so the audio pump keeps working
/// across a failover swap; only the event pump is bound to one
/// connection's event stream and gets rebuilt.
struct SessionRuntime {
    provider: Arc<tokio::sync::Mutex<VoiceProvider>>,
    provider_name: String,
    failover_used: bool,
    had_error: bool,
    shutdown: watch::Sender<bool>,
    audio_task: JoinHandle<()>,
    event_task: JoinHandle<()>,
    leg_outbound: mpsc::Sender<AudioChunk>,
    leg_shape: (AudioFormat, u32),
}

/// Orchestrates sessions: provider selection with one-shot failover,
/// pump task lifecycle, and teardown.
pub struct VoiceEngine {
    registry: Arc<SessionRegistry>,
    health: Arc<HealthRegistry>,
    factory: Arc<dyn ProviderFactory>,
    config: EngineConfig,
    runtimes: Mutex<HashMap<String, SessionRuntime>>,
}

impl VoiceEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        health: Arc<HealthRegistry>,
        factory: Arc<dyn ProviderFactory>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            health,
            factory,
            config,
            runtimes: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// Creates a session for a call leg, connects a provider through the
    /// failover chain, and starts both pumps.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ProviderUnavailable`] when every candidate
    /// is exhausted; the session is left in `error` state for consumers
    /// to observe.
    pub async fn start_session(
        self: &Arc<Self>,
        config: SessionConfig,
        call_id: Option<String>,
        leg: CallLeg,
    ) -> Result<String, SessionError> {
        let candidates = self.health.candidates();
        let strategy = candidates
            .first()
            .map(|c| c.strategy)
            .unwrap_or(trunkline_types::ProviderStrategy::Realtime);

        let session = self
            .registry
            .create("unselected", strategy, config.clone(), call_id)
            .await;
        let session_id = session.session_id.clone();

        if candidates.is_empty() {
            tracing::error!(%session_id, "no enabled healthy provider configured");
            self.registry
                .transition(&session_id, SessionState::Error, Some("provider_unavailable"))
                .await?;
            return Err(SessionError::ProviderUnavailable);
        }

        self.registry
            .transition(&session_id, SessionState::Connecting, None)
            .await?;

        let Some((entry, mut provider)) =
            self.connect_chain(&session_id, &config, &candidates, None).await
        else {
            self.registry
                .transition(&session_id, SessionState::Error, Some("provider_unavailable"))
                .await?;
            return Err(SessionError::ProviderUnavailable);
        };

        let events_rx = provider.events()?;
        self.registry
            .set_provider(&session_id, &entry.kind, entry.strategy)
            .await?;
        self.registry
            .transition(&session_id, SessionState::Connected, None)
            .await?;

        let provider = Arc::new(tokio::sync::Mutex::new(provider));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let leg_outbound = leg.outbound.clone();
        let leg_shape = (leg.format, leg.sample_rate);

        let audio_task = self.clone().spawn_audio_pump(
            session_id.clone(),
            leg.inbound,
            provider.clone(),
            leg_shape,
            (config.audio_format, config.sample_rate),
            shutdown_rx.clone(),
        );
        let event_task = self.clone().spawn_event_pump(
            session_id.clone(),
            events_rx,
            leg.outbound,
            leg_shape,
            shutdown_rx,
        );

        self.runtimes.lock().expect("engine runtimes lock poisoned").insert(
            session_id.clone(),
            SessionRuntime {
                provider,
                provider_name: entry.name,
                failover_used: false,
                had_error: false,
                shutdown: shutdown_tx,
                audio_task,
                event_task,
                leg_outbound,
                leg_shape,
            },
        );
        Ok(session_id)
    }

    /// Walks the candidate chain once: build, validate, connect. Each
    /// candidate is attempted at most once per session — a one-shot
    /// fallback, never a retry loop.
    async fn connect_chain(
        &self,
        session_id: &str,
        config: &SessionConfig,
        candidates: &[ProviderEntry],
        skip: Option<&str>,
    ) -> Option<(ProviderEntry, VoiceProvider)> {
        for entry in candidates {
            if Some(entry.name.as_str()) == skip {
                continue;
            }
            let mut provider = match self.factory.build(entry).await {
                Ok(provider) => provider,
                Err(e) => {
                    tracing::warn!(%session_id, provider = %entry.name, error = %e, "provider construction failed");
                    self.health.record_failure(&entry.name);
                    continue;
                }
            };
            if let Err(e) = provider.validate_config(config) {
                // A capability mismatch is a config problem, not a
                // provider fault; skip without a health penalty.
                tracing::warn!(%session_id, provider = %entry.name, error = %e, "session config rejected by capabilities");
                continue;
            }

            let started = Instant::now();
            match provider.connect(config).await {
                Ok(()) => {
                    let latency = started.elapsed();
                    self.health.record_success(&entry.name, latency);
                    tracing::info!(
                        %session_id,
                        provider = %entry.name,
                        latency_ms = latency.as_millis() as u64,
                        "provider connected"
                    );
                    return Some((entry.clone(), provider));
                }
                Err(e) => {
                    tracing::warn!(%session_id, provider = %entry.name, error = %e, "provider connect failed");
                    self.health.record_failure(&entry.name);
                }
            }
        }
        None
    }

    /// The telephony→provider audio pump. Suspends on the next inbound
    /// frame, converts it to the provider's shape, forwards in arrival
    /// order. Survives failover: it sends into the shared provider cell,
    /// dropping frames while a reconnect is in flight.
    fn spawn_audio_pump(
        self: Arc<Self>,
        session_id: String,
        mut inbound: mpsc::Receiver<AudioChunk>,
        provider: Arc<tokio::sync::Mutex<VoiceProvider>>,
        leg_shape: (AudioFormat, u32),
        provider_shape: (AudioFormat, u32),
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut first_frame = true;
            loop {
                let chunk = tokio::select! {
                    _ = shutdown.changed() => break,
                    chunk = inbound.recv() => match chunk {
                        Some(chunk) => chunk,
                        None => {
                            // Carrier leg closed without a hangup webhook.
                            tracing::debug!(%session_id, "telephony leg closed, ending session");
                            let engine = self.clone();
                            let id = session_id.clone();
                            tokio::spawn(async move {
                                engine.end_session(&id, "carrier_leg_closed").await;
                            });
                            break;
                        }
                    },
                };

                if chunk.format != leg_shape.0 || chunk.sample_rate != leg_shape.1 {
                    tracing::warn!(
                        %session_id,
                        format = %chunk.format,
                        sample_rate = chunk.sample_rate,
                        "dropping frame that does not match the leg's declared shape"
                    );
                    continue;
                }

                let converted =
                    match trunkline_codec::convert(&chunk, provider_shape.0, provider_shape.1) {
                        Ok(converted) => converted,
                        Err(e) => {
                            // Fatal for this send, not for the session.
                            tracing::warn!(%session_id, error = %e, "audio conversion failed");
                            continue;
                        }
                    };

                let send_result = provider.lock().await.send_audio(converted).await;
                match send_result {
                    Ok(()) => {
                        if first_frame {
                            first_frame = false;
                            let _ = self.registry.mark_active(&session_id).await;
                        }
                    }
                    Err(ProviderError::UnsupportedAudioFormat { format, sample_rate }) => {
                        tracing::warn!(%session_id, %format, sample_rate, "provider rejected frame format");
                    }
                    Err(e) => {
                        // Real-time audio: frames sent into a dead or
                        // reconnecting provider are dropped, not queued.
                        // Recovery is the event pump's job.
                        tracing::debug!(%session_id, error = %e, "dropping frame, provider not writable");
                    }
                }
            }
        })
    }

    /// The provider→telephony event pump. Suspends on the next provider
    /// event; forwards audio to the leg, transcripts and function calls
    /// to consumers. A provider error or stream loss here drives the
    /// one-shot failover, a clean disconnect drives teardown.
    fn spawn_event_pump(
        self: Arc<Self>,
        session_id: String,
        mut events: mpsc::Receiver<ProviderEvent>,
        outbound: mpsc::Sender<AudioChunk>,
        leg_shape: (AudioFormat, u32),
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut first_payload = true;
            loop {
                let event = tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => {
                            // Channel closed without a terminal event:
                            // treat as a mid-session connection loss.
                            self.clone().recover_in_task(&session_id, "provider stream closed");
                            break;
                        }
                    },
                };

                if first_payload
                    && !matches!(
                        event,
                        ProviderEvent::Disconnected { .. } | ProviderEvent::Error { .. }
                    )
                {
                    first_payload = false;
                    let _ = self.registry.mark_active(&session_id).await;
                }

                match event {
                    ProviderEvent::Audio(chunk) => {
                        let converted =
                            match trunkline_codec::convert(&chunk, leg_shape.0, leg_shape.1) {
                                Ok(converted) => converted,
                                Err(e) => {
                                    tracing::warn!(%session_id, error = %e, "playback conversion failed");
                                    continue;
                                }
                            };
                        // Bounded send: backpressure blocks us here, never
                        // an unbounded buffer.
                        if outbound.send(converted).await.is_err() {
                            tracing::debug!(%session_id, "telephony leg gone, ending session");
                            let engine = self.clone();
                            let id = session_id.clone();
                            tokio::spawn(async move {
                                engine.end_session(&id, "carrier_leg_closed").await;
                            });
                            break;
                        }
                    }
                    ProviderEvent::Transcript { role, text, is_final } => {
                        self.registry
                            .emit(SessionEvent::Transcript {
                                session_id: session_id.clone(),
                                role,
                                text,
                                is_final,
                            })
                            .await;
                    }
                    ProviderEvent::Text(text) => {
                        self.registry
                            .emit(SessionEvent::Transcript {
                                session_id: session_id.clone(),
                                role: trunkline_types::TranscriptRole::Assistant,
                                text,
                                is_final: false,
                            })
                            .await;
                    }
                    ProviderEvent::FunctionCall { call_id, name, arguments } => {
                        self.registry
                            .emit(SessionEvent::FunctionCallRequested {
                                session_id: session_id.clone(),
                                call_id,
                                name,
                                arguments,
                            })
                            .await;
                    }
                    ProviderEvent::Disconnected { reason } => {
                        let reason = reason.unwrap_or_else(|| "provider_disconnect".to_string());
                        tracing::info!(%session_id, %reason, "provider closed the session");
                        let engine = self.clone();
                        let id = session_id.clone();
                        tokio::spawn(async move {
                            engine.end_session(&id, &reason).await;
                        });
                        break;
                    }
                    ProviderEvent::Error { message } => {
                        tracing::warn!(%session_id, %message, "provider error, recovering");
                        self.clone().recover_in_task(&session_id, &message);
                        break;
                    }
                }
            }
        })
    }

    /// Spawns `handle_provider_failure` so the event pump can exit
    /// immediately (teardown joins the pumps; recovering inline from the
    /// pump itself would deadlock the join).
    fn recover_in_task(self: Arc<Self>, session_id: &str, message: &str) {
        let id = session_id.to_string();
        let message = message.to_string();
        tokio::spawn(async move {
            self.handle_provider_failure(&id, &message).await;
        });
    }

    /// Mid-session provider failure: at most one failover reconnect with
    /// the next healthy candidate, then a terminal `error`.
    pub async fn handle_provider_failure(self: &Arc<Self>, session_id: &str, message: &str) {
        let Ok(session) = self.registry.get(session_id) else {
            return;
        };
        if session.state.is_terminal() {
            return;
        }

        // Decide under the lock, act after releasing it.
        let attempt = {
            let mut runtimes = self.runtimes.lock().expect("engine runtimes lock poisoned");
            match runtimes.get_mut(session_id) {
                None => return,
                Some(runtime) if runtime.failover_used => {
                    runtime.had_error = true;
                    None
                }
                Some(runtime) => {
                    runtime.failover_used = true;
                    Some((
                        runtime.provider.clone(),
                        runtime.provider_name.clone(),
                        runtime.leg_outbound.clone(),
                        runtime.leg_shape,
                        runtime.shutdown.subscribe(),
                    ))
                }
            }
        };

        let Some((cell, failed_name, leg_outbound, leg_shape, shutdown_rx)) = attempt else {
            tracing::error!(%session_id, %message, "provider failed after failover, tearing down");
            self.fail_session(session_id, "protocol_error").await;
            return;
        };

        if self
            .registry
            .transition(session_id, SessionState::Connecting, Some("failover"))
            .await
            .is_err()
        {
            self.fail_session(session_id, "protocol_error").await;
            return;
        }

        let candidates = self.health.candidates();
        let connected = self
            .connect_chain(session_id, &session.config, &candidates, Some(failed_name.as_str()))
            .await;

        let Some((entry, mut provider)) = connected else {
            tracing::error!(%session_id, "failover exhausted all candidates");
            self.fail_session(session_id, "provider_unavailable").await;
            return;
        };

        let events_rx = match provider.events() {
            Ok(events_rx) => events_rx,
            Err(e) => {
                tracing::error!(%session_id, error = %e, "failover provider yielded no event stream");
                self.fail_session(session_id, "protocol_error").await;
                return;
            }
        };

        // Swap the connection inside the shared cell — the audio pump
        // picks it up on its next send — and rebuild the event pump.
        {
            let mut guard = cell.lock().await;
            *guard = provider;
        }
        let _ = self
            .registry
            .set_provider(session_id, &entry.kind, entry.strategy)
            .await;
        if self
            .registry
            .transition(session_id, SessionState::Connected, None)
            .await
            .is_err()
        {
            self.fail_session(session_id, "protocol_error").await;
            return;
        }

        let event_task = self.clone().spawn_event_pump(
            session_id.to_string(),
            events_rx,
            leg_outbound,
            leg_shape,
            shutdown_rx,
        );

        let new_name = entry.name.clone();
        {
            let mut runtimes = self.runtimes.lock().expect("engine runtimes lock poisoned");
            if let Some(runtime) = runtimes.get_mut(session_id) {
                runtime.provider_name = entry.name;
                runtime.event_task = event_task;
            } else {
                // Teardown won the race; stop the fresh pump.
                event_task.abort();
            }
        }
        tracing::info!(
            %session_id,
            from = %failed_name,
            to = %new_name,
            "failover reconnect succeeded"
        );
    }

    /// Moves a session to terminal `error` and releases its resources.
    async fn fail_session(self: &Arc<Self>, session_id: &str, reason: &str) {
        let _ = self
            .registry
            .transition(session_id, SessionState::Error, Some(reason))
            .await;
        self.release_runtime(session_id, true).await;
    }

    /// Ends a session: cancels both pumps promptly, releases the
    /// provider connection, and walks the state machine through
    /// `disconnecting → disconnected`. Idempotent — repeated hangups
    /// (duplicate webhook delivery) are no-ops.
    pub async fn end_session(self: &Arc<Self>, session_id: &str, reason: &str) {
        let _ = self
            .registry
            .transition(session_id, SessionState::Disconnecting, Some(reason))
            .await;
        self.release_runtime(session_id, false).await;
        let _ = self
            .registry
            .transition(session_id, SessionState::Disconnected, None)
            .await;
        tracing::info!(%session_id, %reason, "session ended");
    }

    /// Takes a session's runtime, stops its pumps under the teardown
    /// timeout, and releases the provider connection. Idempotent: the
    /// second caller finds nothing to release.
    async fn release_runtime(self: &Arc<Self>, session_id: &str, had_error: bool) {
        let runtime = {
            let mut runtimes = self.runtimes.lock().expect("engine runtimes lock poisoned");
            runtimes.remove(session_id)
        };
        let Some(runtime) = runtime else {
            return;
        };

        let _ = runtime.shutdown.send(true);
        for task in [runtime.audio_task, runtime.event_task] {
            self.join_task(session_id, task).await;
        }
        self.release_provider(session_id, &runtime.provider).await;
        self.health
            .record_session_end(&runtime.provider_name, had_error || runtime.had_error);
    }

    /// Joins one pump task under the teardown timeout, aborting it if it
    /// does not stop in time.
    async fn join_task(&self, session_id: &str, mut task: JoinHandle<()>) {
        if tokio::time::timeout(self.config.teardown_timeout, &mut task)
            .await
            .is_err()
        {
            tracing::warn!(%session_id, "pump did not stop within teardown timeout, aborting");
            task.abort();
        }
    }

    /// Disconnects the provider leg under the teardown timeout,
    /// independent of the telephony leg's responsiveness.
    async fn release_provider(
        &self,
        session_id: &str,
        provider: &Arc<tokio::sync::Mutex<VoiceProvider>>,
    ) {
        let disconnect = async {
            let mut provider = provider.lock().await;
            provider.disconnect().await
        };
        match tokio::time::timeout(self.config.teardown_timeout, disconnect).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(%session_id, error = %e, "provider disconnect reported an error")
            }
            Err(_) => tracing::warn!(%session_id, "provider disconnect timed out"),
        }
    }

    /// Sends a text message into a session's conversation.
    pub async fn send_text(&self, session_id: &str, text: &str) -> Result<(), SessionError> {
        let provider = self.provider_cell(session_id)?;
        provider.lock().await.send_text(text).await?;
        self.registry.mark_active(session_id).await?;
        Ok(())
    }

    /// Returns a tool invocation result to the session's provider.
    pub async fn submit_function_result(
        &self,
        session_id: &str,
        call_id: &str,
        result: serde_json::Value,
    ) -> Result<(), SessionError> {
        let provider = self.provider_cell(session_id)?;
        provider
            .lock()
            .await
            .handle_function_result(call_id, result)
            .await?;
        Ok(())
    }

    /// Whether the engine still tracks live resources for a session.
    pub fn is_running(&self, session_id: &str) -> bool {
        self.runtimes
            .lock()
            .expect("engine runtimes lock poisoned")
            .contains_key(session_id)
    }

    fn provider_cell(
        &self,
        session_id: &str,
    ) -> Result<Arc<tokio::sync::Mutex<VoiceProvider>>, SessionError> {
        self.runtimes
            .lock()
            .expect("engine runtimes lock poisoned")
            .get(session_id)
            .map(|runtime| runtime.provider.clone())
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }
}
