//! End-to-end engine scenarios over a scripted mock provider.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use trunkline_health::{HealthPolicy, HealthRegistry, ProviderEntry};
use trunkline_provider::{
    ProviderError, ProviderEvent, RealtimeEndToEndProvider, VoiceProvider,
};
use trunkline_session::{CallLeg, EngineConfig, ProviderFactory, SessionRegistry, VoiceEngine};
use trunkline_types::{
    AudioChunk, AudioFormat, CostTier, ProviderCapabilities, ProviderStrategy, SessionConfig,
    SessionState,
};

/// Test-side handle into one built mock provider instance.
#[derive(Clone)]
struct MockHandle {
    name: String,
    received: Arc<Mutex<Vec<AudioChunk>>>,
    control: Arc<Mutex<Option<mpsc::Sender<ProviderEvent>>>>,
}

impl MockHandle {
    async fn inject(&self, event: ProviderEvent) {
        let tx = self
            .control
            .lock()
            .unwrap()
            .clone()
            .expect("provider not connected");
        tx.send(event).await.expect("event channel closed");
    }

    fn received_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

struct MockProvider {
    caps: ProviderCapabilities,
    fail_connect: bool,
    received: Arc<Mutex<Vec<AudioChunk>>>,
    control: Arc<Mutex<Option<mpsc::Sender<ProviderEvent>>>>,
    events_rx: Option<mpsc::Receiver<ProviderEvent>>,
}

#[async_trait]
impl RealtimeEndToEndProvider for MockProvider {
    fn capabilities(&self) -> &ProviderCapabilities {
        &self.caps
    }

    async fn connect(&mut self, _config: &SessionConfig) -> Result<(), ProviderError> {
        if self.fail_connect {
            return Err(ProviderError::Connection("scripted connect failure".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.control.lock().unwrap() = Some(tx);
        self.events_rx = Some(rx);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ProviderError> {
        self.control.lock().unwrap().take();
        Ok(())
    }

    async fn send_audio(&self, chunk: AudioChunk) -> Result<(), ProviderError> {
        self.received.lock().unwrap().push(chunk);
        Ok(())
    }

    async fn send_text(&self, _text: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    fn events(&mut self) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
        self.events_rx.take().ok_or(ProviderError::EventsTaken)
    }

    async fn handle_function_result(
        &self,
        _call_id: &str,
        _result: serde_json::Value,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Builds a fresh mock instance per `build` call and keeps a handle to
/// each for assertions.
struct MockFactory {
    fail_connect: HashSet<String>,
    built: Mutex<Vec<MockHandle>>,
}

impl MockFactory {
    fn new(fail_connect: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fail_connect: fail_connect.iter().map(|s| s.to_string()).collect(),
            built: Mutex::new(Vec::new()),
        })
    }

    fn handle(&self, index: usize) -> MockHandle {
        self.built.lock().unwrap()[index].clone()
    }

    fn built_count(&self) -> usize {
        self.built.lock().unwrap().len()
    }
}

#[async_trait]
impl ProviderFactory for MockFactory {
    async fn build(&self, entry: &ProviderEntry) -> Result<VoiceProvider, ProviderError> {
        let handle = MockHandle {
            name: entry.name.clone(),
            received: Arc::new(Mutex::new(Vec::new())),
            control: Arc::new(Mutex::new(None)),
        };
        let provider = MockProvider {
            caps: ProviderCapabilities {
                audio_formats: vec![AudioFormat::Pcm16],
                sample_rates: vec![],
                streaming: true,
                function_calling: true,
                max_context_tokens: 32_768,
                cost_tier: CostTier::Standard,
            },
            fail_connect: self.fail_connect.contains(&entry.name),
            received: handle.received.clone(),
            control: handle.control.clone(),
            events_rx: None,
        };
        self.built.lock().unwrap().push(handle);
        Ok(VoiceProvider::Realtime(Box::new(provider)))
    }
}

fn entry(name: &str, priority: u32) -> ProviderEntry {
    ProviderEntry {
        name: name.to_string(),
        kind: format!("{name}-kind"),
        strategy: ProviderStrategy::Realtime,
        priority,
        is_enabled: true,
    }
}

struct Harness {
    engine: Arc<VoiceEngine>,
    factory: Arc<MockFactory>,
}

fn harness(providers: &[(&str, u32)], fail_connect: &[&str]) -> Harness {
    let health = Arc::new(HealthRegistry::new(HealthPolicy {
        failure_threshold: 3,
        cooldown_secs: 60,
    }));
    for (name, priority) in providers {
        health.register(entry(name, *priority));
    }
    let factory = MockFactory::new(fail_connect);
    let registry = Arc::new(SessionRegistry::new(None));
    let engine = VoiceEngine::new(
        registry,
        health,
        factory.clone(),
        EngineConfig {
            teardown_timeout: Duration::from_secs(2),
        },
    );
    Harness { engine, factory }
}

/// A carrier leg: u-law at 8 kHz on both directions.
fn leg() -> (CallLeg, mpsc::Sender<AudioChunk>, mpsc::Receiver<AudioChunk>) {
    let (carrier_tx, engine_rx) = mpsc::channel(32);
    let (engine_tx, carrier_rx) = mpsc::channel(32);
    let leg = CallLeg {
        inbound: engine_rx,
        outbound: engine_tx,
        format: AudioFormat::Ulaw,
        sample_rate: 8_000,
    };
    (leg, carrier_tx, carrier_rx)
}

fn session_config() -> SessionConfig {
    SessionConfig::new("mock-voice-1", 16_000)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}

#[tokio::test]
async fn full_call_flow_reaches_disconnected() {
    let h = harness(&[("primary", 1)], &[]);
    let (leg, carrier_tx, mut carrier_rx) = leg();

    let session_id = h
        .engine
        .start_session(session_config(), Some("CA100".into()), leg)
        .await
        .unwrap();

    let session = h.engine.registry().get(&session_id).unwrap();
    assert_eq!(session.state, SessionState::Connected);
    assert_eq!(session.provider_type, "primary-kind");

    // Three carrier frames flow to the provider, converted to its shape.
    for _ in 0..3 {
        carrier_tx
            .send(AudioChunk::ulaw(vec![0x55; 160]))
            .await
            .unwrap();
    }
    let provider = h.factory.handle(0);
    wait_until(|| provider.received_count() == 3).await;
    {
        let received = provider.received.lock().unwrap();
        assert!(received
            .iter()
            .all(|c| c.format == AudioFormat::Pcm16 && c.sample_rate == 16_000));
    }

    // First payload moved the session to active.
    wait_until(|| {
        h.engine.registry().get(&session_id).unwrap().state == SessionState::Active
    })
    .await;

    // Three provider audio deltas flow back, converted to the leg shape.
    for _ in 0..3 {
        provider
            .inject(ProviderEvent::Audio(AudioChunk::pcm16(vec![0; 640], 16_000)))
            .await;
    }
    for _ in 0..3 {
        let chunk = tokio::time::timeout(Duration::from_secs(2), carrier_rx.recv())
            .await
            .expect("playback frame not delivered")
            .unwrap();
        assert_eq!(chunk.format, AudioFormat::Ulaw);
        assert_eq!(chunk.sample_rate, 8_000);
        assert_eq!(chunk.data.len(), 160);
    }

    // Carrier hangup (as the webhook layer would drive it).
    h.engine.end_session(&session_id, "caller_hangup").await;

    let session = h.engine.registry().get(&session_id).unwrap();
    assert_eq!(session.state, SessionState::Disconnected);
    assert_eq!(session.state_reason.as_deref(), Some("caller_hangup"));
    assert!(!h.engine.is_running(&session_id), "pumps must be gone");

    // Duplicate hangup is a no-op, not an error.
    h.engine.end_session(&session_id, "caller_hangup").await;
    assert_eq!(
        h.engine.registry().get(&session_id).unwrap().state,
        SessionState::Disconnected
    );
}

#[tokio::test]
async fn connect_failure_fails_over_to_next_candidate() {
    let h = harness(&[("first", 1), ("second", 2)], &["first"]);
    let (leg, _carrier_tx, _carrier_rx) = leg();

    let session_id = h
        .engine
        .start_session(session_config(), None, leg)
        .await
        .unwrap();

    let session = h.engine.registry().get(&session_id).unwrap();
    assert_eq!(session.state, SessionState::Connected);
    assert_eq!(session.provider_type, "second-kind");

    // The failed candidate's record moved by exactly one.
    let first = h.engine.health().snapshot("first").unwrap();
    assert_eq!(first.consecutive_failures, 1);
    let second = h.engine.health().snapshot("second").unwrap();
    assert_eq!(second.consecutive_failures, 0);
    assert!(second.latency_p50_ms.is_some());
}

#[tokio::test]
async fn exhausted_candidates_fail_the_session() {
    let h = harness(&[("only", 1)], &["only"]);
    let (leg, _carrier_tx, _carrier_rx) = leg();

    let err = h
        .engine
        .start_session(session_config(), None, leg)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        trunkline_session::SessionError::ProviderUnavailable
    ));

    let sessions = h.engine.registry().list(10);
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state, SessionState::Error);
    assert_eq!(
        sessions[0].state_reason.as_deref(),
        Some("provider_unavailable")
    );
}

#[tokio::test]
async fn no_configured_providers_fail_the_session() {
    let h = harness(&[], &[]);
    let (leg, _carrier_tx, _carrier_rx) = leg();
    let err = h
        .engine
        .start_session(session_config(), None, leg)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        trunkline_session::SessionError::ProviderUnavailable
    ));
}

#[tokio::test]
async fn concurrent_sessions_are_isolated() {
    let h = harness(&[("primary", 1)], &[]);

    let (leg_a, carrier_a, _rx_a) = leg();
    let (leg_b, carrier_b, _rx_b) = leg();

    let session_a = h
        .engine
        .start_session(session_config(), Some("CA-A".into()), leg_a)
        .await
        .unwrap();
    let session_b = h
        .engine
        .start_session(session_config(), Some("CA-B".into()), leg_b)
        .await
        .unwrap();
    assert_ne!(session_a, session_b);
    assert_eq!(h.factory.built_count(), 2);

    // Distinct payload marker per session.
    carrier_a.send(AudioChunk::ulaw(vec![0x11; 160])).await.unwrap();
    carrier_a.send(AudioChunk::ulaw(vec![0x11; 160])).await.unwrap();
    carrier_b.send(AudioChunk::ulaw(vec![0x22; 160])).await.unwrap();

    let provider_a = h.factory.handle(0);
    let provider_b = h.factory.handle(1);
    wait_until(|| provider_a.received_count() == 2 && provider_b.received_count() == 1).await;

    // Frames sent to session A never appear in session B's pump.
    assert_eq!(provider_a.name, "primary");
    assert_eq!(provider_a.received_count(), 2);
    assert_eq!(provider_b.received_count(), 1);

    h.engine.end_session(&session_a, "test_done").await;
    h.engine.end_session(&session_b, "test_done").await;
}

#[tokio::test]
async fn mid_session_provider_error_fails_over_once() {
    let h = harness(&[("first", 1), ("second", 2)], &[]);
    let (leg, carrier_tx, mut carrier_rx) = leg();

    let session_id = h
        .engine
        .start_session(session_config(), None, leg)
        .await
        .unwrap();
    assert_eq!(
        h.engine.registry().get(&session_id).unwrap().provider_type,
        "first-kind"
    );

    // The connected provider dies mid-session.
    let first = h.factory.handle(0);
    first
        .inject(ProviderEvent::Error {
            message: "socket reset".into(),
        })
        .await;

    // One failover reconnect lands on the next candidate.
    wait_until(|| {
        let session = h.engine.registry().get(&session_id).unwrap();
        session.state == SessionState::Connected && session.provider_type == "second-kind"
    })
    .await;

    // The session still works end to end: carrier audio reaches the new
    // provider, and its audio reaches the carrier.
    let second = h.factory.handle(1);
    carrier_tx.send(AudioChunk::ulaw(vec![0x33; 160])).await.unwrap();
    wait_until(|| second.received_count() >= 1).await;
    second
        .inject(ProviderEvent::Audio(AudioChunk::pcm16(vec![0; 640], 16_000)))
        .await;
    let chunk = tokio::time::timeout(Duration::from_secs(2), carrier_rx.recv())
        .await
        .expect("playback frame not delivered")
        .unwrap();
    assert_eq!(chunk.format, AudioFormat::Ulaw);

    // A second failure is terminal: the failover is one-shot.
    second
        .inject(ProviderEvent::Error {
            message: "socket reset again".into(),
        })
        .await;
    wait_until(|| {
        h.engine.registry().get(&session_id).unwrap().state == SessionState::Error
    })
    .await;
    wait_until(|| !h.engine.is_running(&session_id)).await;
}

#[tokio::test]
async fn provider_disconnect_ends_the_session() {
    let h = harness(&[("primary", 1)], &[]);
    let (leg, _carrier_tx, _carrier_rx) = leg();

    let session_id = h
        .engine
        .start_session(session_config(), None, leg)
        .await
        .unwrap();

    h.factory
        .handle(0)
        .inject(ProviderEvent::Disconnected {
            reason: Some("provider_done".into()),
        })
        .await;

    wait_until(|| {
        h.engine.registry().get(&session_id).unwrap().state == SessionState::Disconnected
    })
    .await;
    wait_until(|| !h.engine.is_running(&session_id)).await;
}

#[tokio::test]
async fn carrier_leg_closure_ends_the_session() {
    let h = harness(&[("primary", 1)], &[]);
    let (leg, carrier_tx, _carrier_rx) = leg();

    let session_id = h
        .engine
        .start_session(session_config(), None, leg)
        .await
        .unwrap();

    drop(carrier_tx);

    wait_until(|| {
        h.engine.registry().get(&session_id).unwrap().state == SessionState::Disconnected
    })
    .await;
    assert_eq!(
        h.engine
            .registry()
            .get(&session_id)
            .unwrap()
            .state_reason
            .as_deref(),
        Some("carrier_leg_closed")
    );
}
