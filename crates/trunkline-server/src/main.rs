//! Trunkline server binary — the voice engine's HTTP/WebSocket edge.
//!
//! Starts an axum server with structured logging, database
//! initialization (degrading to memory-only if the store is
//! unavailable), carrier adapters, the provider health registry, and
//! graceful shutdown on SIGTERM/SIGINT.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use trunkline_health::{HealthPolicy, HealthRegistry};
use trunkline_server::config::{self, Config};
use trunkline_server::factory::{registry_entry, ConfiguredProviderFactory};
use trunkline_server::{app, AppState};
use trunkline_session::{EngineConfig, SessionRegistry, SessionStore, SqliteSessionStore, VoiceEngine};
use trunkline_telephony::{TelephonyAdapter, TelnyxAdapter, TelnyxConfig, TwilioAdapter, TwilioConfig};

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("TRUNKLINE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Opens the session store, tolerating unavailability: a failure logs
/// loudly and returns `None`, leaving the engine memory-only.
fn open_store(config: &Config) -> (Option<trunkline_db::DbPool>, Option<Arc<dyn SessionStore>>) {
    let settings = trunkline_db::DbRuntimeSettings {
        busy_timeout_ms: config.database.busy_timeout_ms,
        pool_max_size: config.database.pool_max_size,
    };
    let pool = match trunkline_db::create_pool(&config.database.path, settings) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(path = %config.database.path, error = %e, "session store unavailable, running memory-only");
            return (None, None);
        }
    };

    let migration_result = pool
        .get()
        .map_err(|e| e.to_string())
        .and_then(|conn| trunkline_db::run_migrations(&conn).map_err(|e| e.to_string()));
    match migration_result {
        Ok(applied) => {
            if applied > 0 {
                tracing::info!(count = applied, "applied database migrations");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "migrations failed, running memory-only");
            return (None, None);
        }
    }

    let store: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(pool.clone()));
    (Some(pool), Some(store))
}

/// Builds the carrier adapters that have credentials configured.
fn build_adapters(config: &Config) -> HashMap<String, Arc<dyn TelephonyAdapter>> {
    let mut adapters: HashMap<String, Arc<dyn TelephonyAdapter>> = HashMap::new();

    if let Some(twilio) = &config.telephony.twilio {
        let mut adapter_config = TwilioConfig::new(&twilio.account_sid, &twilio.auth_token);
        adapter_config.strict_signatures = twilio.strict_signatures;
        match TwilioAdapter::new(adapter_config) {
            Ok(adapter) => {
                adapters.insert("twilio".to_string(), Arc::new(adapter));
            }
            Err(e) => tracing::warn!(error = %e, "twilio adapter disabled"),
        }
    }

    if let Some(telnyx) = &config.telephony.telnyx {
        let mut adapter_config = TelnyxConfig::new(&telnyx.api_key, &telnyx.public_key);
        adapter_config.strict_signatures = telnyx.strict_signatures;
        match TelnyxAdapter::new(adapter_config) {
            Ok(adapter) => {
                adapters.insert("telnyx".to_string(), Arc::new(adapter));
            }
            Err(e) => tracing::warn!(error = %e, "telnyx adapter disabled"),
        }
    }

    if adapters.is_empty() {
        tracing::warn!("no telephony carrier configured; webhook endpoints will reject traffic");
    }
    adapters
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Session store (optional — the engine degrades to memory-only)
    let (pool, store) = open_store(&config);

    // Provider health registry and factory
    let health = Arc::new(HealthRegistry::new(HealthPolicy {
        failure_threshold: config.engine.failure_threshold,
        cooldown_secs: config.engine.cooldown_secs,
    }));
    for spec in &config.providers {
        health.register(registry_entry(spec));
        tracing::info!(
            provider = %spec.name,
            kind = %spec.kind,
            strategy = %spec.strategy,
            priority = spec.priority,
            enabled = spec.enabled,
            "registered provider"
        );
    }
    let factory = Arc::new(ConfiguredProviderFactory::new(config.providers.clone()));

    // Engine
    let registry = Arc::new(SessionRegistry::new(store));
    let engine = VoiceEngine::new(
        registry,
        health,
        factory,
        EngineConfig {
            teardown_timeout: Duration::from_secs(config.engine.teardown_timeout_secs),
        },
    );

    // Telephony adapters
    let adapters = build_adapters(&config);

    let state = AppState {
        engine,
        adapters,
        pool,
        public_url: config.server.public_url.clone(),
        session_defaults: config.session_defaults.clone(),
        telnyx_connection_id: config
            .telephony
            .telnyx
            .as_ref()
            .and_then(|t| t.connection_id.clone()),
        channel_capacity: config.engine.channel_capacity,
        pending_calls: Arc::new(std::sync::RwLock::new(HashMap::new())),
        call_carriers: Arc::new(std::sync::RwLock::new(HashMap::new())),
    };

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, public_url = %config.server.public_url, "starting trunkline server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("trunkline server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
