//! HTTP surface tests: webhook signature gates, session APIs, health.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use ed25519_dalek::{Signer, SigningKey};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use trunkline_health::{HealthPolicy, HealthRegistry, ProviderEntry};
use trunkline_provider::{ProviderError, VoiceProvider};
use trunkline_server::{app, AppState};
use trunkline_session::{EngineConfig, ProviderFactory, SessionRegistry, VoiceEngine};
use trunkline_telephony::{signature, TelephonyAdapter, TelnyxAdapter, TelnyxConfig, TwilioAdapter, TwilioConfig};
use trunkline_types::{ProviderStrategy, SessionConfig, SessionState};

const TWILIO_TOKEN: &str = "test-twilio-auth-token";
const PUBLIC_URL: &str = "http://localhost:3100";

/// Webhook tests never connect a provider.
struct NoFactory;

#[async_trait]
impl ProviderFactory for NoFactory {
    async fn build(&self, _entry: &ProviderEntry) -> Result<VoiceProvider, ProviderError> {
        Err(ProviderError::Unavailable("not under test".into()))
    }
}

fn test_state(telnyx_signing_key: &SigningKey) -> AppState {
    let health = Arc::new(HealthRegistry::new(HealthPolicy::default()));
    let registry = Arc::new(SessionRegistry::new(None));
    let engine = VoiceEngine::new(registry, health, Arc::new(NoFactory), EngineConfig::default());

    let mut adapters: HashMap<String, Arc<dyn TelephonyAdapter>> = HashMap::new();
    adapters.insert(
        "twilio".to_string(),
        Arc::new(TwilioAdapter::new(TwilioConfig::new("AC1", TWILIO_TOKEN)).unwrap()),
    );
    adapters.insert(
        "telnyx".to_string(),
        Arc::new(
            TelnyxAdapter::new(TelnyxConfig::new(
                "telnyx-api-key",
                hex::encode(telnyx_signing_key.verifying_key().to_bytes()),
            ))
            .unwrap(),
        ),
    );

    AppState {
        engine,
        adapters,
        pool: None,
        public_url: PUBLIC_URL.to_string(),
        session_defaults: Default::default(),
        telnyx_connection_id: None,
        channel_capacity: 16,
        pending_calls: Arc::new(std::sync::RwLock::new(HashMap::new())),
        call_carriers: Arc::new(std::sync::RwLock::new(HashMap::new())),
    }
}

fn signed_twilio_request(body: &str) -> Request<Body> {
    let params: std::collections::BTreeMap<String, String> = body
        .split('&')
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap();
            (k.to_string(), v.to_string())
        })
        .collect();
    let sig = signature::twilio_signature(
        TWILIO_TOKEN,
        &format!("{PUBLIC_URL}/webhooks/twilio"),
        &params,
    );
    Request::builder()
        .method("POST")
        .uri("/webhooks/twilio")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("X-Twilio-Signature", sig)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Seeds a connected session bound to a carrier call leg.
async fn seed_connected_session(state: &AppState, call_id: &str) -> String {
    let registry = state.engine.registry();
    let session = registry
        .create(
            "mock",
            ProviderStrategy::Realtime,
            SessionConfig::new("m", 16_000),
            Some(call_id.to_string()),
        )
        .await;
    registry
        .transition(&session.session_id, SessionState::Connecting, None)
        .await
        .unwrap();
    registry
        .transition(&session.session_id, SessionState::Connected, None)
        .await
        .unwrap();
    session.session_id
}

#[tokio::test]
async fn health_reports_ok() {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let app = app(test_state(&key));
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn twilio_hangup_with_valid_signature_ends_the_session() {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let state = test_state(&key);
    let session_id = seed_connected_session(&state, "CA900").await;
    let app = app(state.clone());

    let response = app
        .oneshot(signed_twilio_request(
            "CallSid=CA900&CallStatus=completed&Direction=outbound-api",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let session = state.engine.registry().get(&session_id).unwrap();
    assert_eq!(session.state, SessionState::Disconnected);
    assert_eq!(session.state_reason.as_deref(), Some("caller_hangup"));
}

#[tokio::test]
async fn twilio_duplicate_hangup_is_idempotent() {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let state = test_state(&key);
    let session_id = seed_connected_session(&state, "CA901").await;

    for _ in 0..2 {
        let response = app(state.clone())
            .oneshot(signed_twilio_request(
                "CallSid=CA901&CallStatus=completed&Direction=outbound-api",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(
        state.engine.registry().get(&session_id).unwrap().state,
        SessionState::Disconnected
    );
}

#[tokio::test]
async fn twilio_webhook_without_signature_is_rejected() {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let state = test_state(&key);
    let session_id = seed_connected_session(&state, "CA902").await;

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/twilio")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(Body::from("CallSid=CA902&CallStatus=completed"))
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Discarded means no side effects: the session is untouched.
    assert_eq!(
        state.engine.registry().get(&session_id).unwrap().state,
        SessionState::Connected
    );
}

#[tokio::test]
async fn twilio_webhook_with_forged_signature_is_rejected() {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let state = test_state(&key);
    seed_connected_session(&state, "CA903").await;

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/twilio")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("X-Twilio-Signature", "Zm9yZ2VkIHNpZ25hdHVyZQ==")
        .body(Body::from("CallSid=CA903&CallStatus=completed"))
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn telnyx_hangup_with_valid_signature_ends_the_session() {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let state = test_state(&key);
    let session_id = seed_connected_session(&state, "v2:call-1").await;

    let body = serde_json::json!({
        "data": {
            "event_type": "call.hangup",
            "payload": { "call_control_id": "v2:call-1" }
        }
    })
    .to_string();
    let sig = hex::encode(key.sign(body.as_bytes()).to_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/telnyx")
        .header("Content-Type", "application/json")
        .header("telnyx-signature-ed25519", sig)
        .body(Body::from(body))
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(
        state.engine.registry().get(&session_id).unwrap().state,
        SessionState::Disconnected
    );
}

#[tokio::test]
async fn telnyx_tampered_body_is_rejected() {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let state = test_state(&key);
    let session_id = seed_connected_session(&state, "v2:call-2").await;

    let signed_body = serde_json::json!({
        "data": {
            "event_type": "call.hangup",
            "payload": { "call_control_id": "v2:call-2" }
        }
    })
    .to_string();
    let sig = hex::encode(key.sign(signed_body.as_bytes()).to_bytes());

    // Deliver a different body under the old signature.
    let tampered = signed_body.replace("call.hangup", "call.answered");
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/telnyx")
        .header("Content-Type", "application/json")
        .header("telnyx-signature-ed25519", sig)
        .body(Body::from(tampered))
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        state.engine.registry().get(&session_id).unwrap().state,
        SessionState::Connected
    );
}

#[tokio::test]
async fn telnyx_unknown_event_type_is_acknowledged() {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let state = test_state(&key);

    let body = serde_json::json!({
        "data": {
            "event_type": "conference.participant.joined",
            "payload": { "call_control_id": "v2:call-3" }
        }
    })
    .to_string();
    let sig = hex::encode(key.sign(body.as_bytes()).to_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/telnyx")
        .header("Content-Type", "application/json")
        .header("telnyx-signature-ed25519", sig)
        .body(Body::from(body))
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    // Unknown but validly signed events are acknowledged, never errors.
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn session_api_lists_and_fetches() {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let state = test_state(&key);
    let session_id = seed_connected_session(&state, "CA904").await;

    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/sessions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["sessions"].as_array().unwrap().len(), 1);

    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/api/sessions/{session_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(state)
        .oneshot(
            Request::builder()
                .uri("/api/sessions/not-a-session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn provider_api_reports_health() {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let state = test_state(&key);
    state.engine.health().register(ProviderEntry {
        name: "rt-1".into(),
        kind: "realtime".into(),
        strategy: ProviderStrategy::Realtime,
        priority: 1,
        is_enabled: true,
    });

    let response = app(state)
        .oneshot(
            Request::builder()
                .uri("/api/providers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let providers = json["providers"].as_array().unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0]["health"]["is_healthy"], true);
}
