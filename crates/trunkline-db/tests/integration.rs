//! File-backed store behavior: sessions survive a process restart.

use trunkline_db::{
    append_session_event, create_pool, create_session, get_session, list_session_events,
    run_migrations, DbRuntimeSettings,
};
use trunkline_types::{
    ProviderStrategy, SessionConfig, SessionEvent, SessionSnapshot, SessionState,
};

fn snapshot(id: &str) -> SessionSnapshot {
    SessionSnapshot {
        session_id: id.to_string(),
        provider_type: "openai-realtime".to_string(),
        strategy: ProviderStrategy::Realtime,
        state: SessionState::Disconnected,
        state_reason: Some("caller_hangup".to_string()),
        call_id: Some("CA1000".to_string()),
        config: SessionConfig::new("realtime-voice-1", 24_000),
        created_at: "2026-08-06T10:00:00Z".to_string(),
        updated_at: "2026-08-06T10:03:21Z".to_string(),
    }
}

#[test]
fn sessions_and_events_survive_pool_reopen() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let db_path = dir.path().join("trunkline.db");
    let db_path = db_path.to_str().unwrap();

    {
        let pool = create_pool(db_path, DbRuntimeSettings::default()).unwrap();
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();

        create_session(&conn, &snapshot("s-restart")).unwrap();
        append_session_event(
            &conn,
            &SessionEvent::SessionEnded {
                session_id: "s-restart".to_string(),
                state: SessionState::Disconnected,
                reason: Some("caller_hangup".to_string()),
            },
        )
        .unwrap();
        // Pool dropped here: simulates a process exit.
    }

    let pool = create_pool(db_path, DbRuntimeSettings::default()).unwrap();
    let conn = pool.get().unwrap();
    // Migrations are idempotent across restarts.
    assert_eq!(run_migrations(&conn).unwrap(), 0);

    let loaded = get_session(&conn, "s-restart").unwrap().unwrap();
    assert_eq!(loaded, snapshot("s-restart"));

    let events = list_session_events(&conn, "s-restart", 10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "session.ended");
    assert_eq!(events[0].seq, 1);
}
