//! Session row and event-log persistence operations.
//!
//! All writes go through the free functions here, operating on a borrowed
//! connection — the session registry is the single writer of session
//! state, and these helpers never enforce transitions themselves.

use crate::error::StoreError;
use rusqlite::{params, Connection, OptionalExtension};
use trunkline_types::{ProviderStrategy, SessionEvent, SessionSnapshot, SessionState};

/// Inserts a new session row.
pub fn create_session(conn: &Connection, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
    let config_json = serde_json::to_string(&snapshot.config)?;
    conn.execute(
        "INSERT INTO sessions
            (session_id, provider_type, strategy, state, state_reason, call_id, config_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            snapshot.session_id,
            snapshot.provider_type,
            snapshot.strategy.as_str(),
            snapshot.state.as_str(),
            snapshot.state_reason,
            snapshot.call_id,
            config_json,
            snapshot.created_at,
            snapshot.updated_at,
        ],
    )?;
    Ok(())
}

/// Overwrites the mutable columns of a session row.
pub fn update_session(conn: &Connection, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE sessions
         SET provider_type = ?2, state = ?3, state_reason = ?4, call_id = ?5, updated_at = ?6
         WHERE session_id = ?1",
        params![
            snapshot.session_id,
            snapshot.provider_type,
            snapshot.state.as_str(),
            snapshot.state_reason,
            snapshot.call_id,
            snapshot.updated_at,
        ],
    )?;
    Ok(())
}

/// Fetches one session by ID.
pub fn get_session(
    conn: &Connection,
    session_id: &str,
) -> Result<Option<SessionSnapshot>, StoreError> {
    conn.query_row(
        "SELECT session_id, provider_type, strategy, state, state_reason, call_id, config_json, created_at, updated_at
         FROM sessions WHERE session_id = ?1",
        [session_id],
        row_to_snapshot,
    )
    .optional()?
    .map(decode_row)
    .transpose()
}

/// Deletes one session row. Missing rows are not an error.
pub fn delete_session(conn: &Connection, session_id: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM sessions WHERE session_id = ?1", [session_id])?;
    Ok(())
}

/// Lists sessions, newest first, bounded by `limit`.
pub fn list_sessions(conn: &Connection, limit: i64) -> Result<Vec<SessionSnapshot>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT session_id, provider_type, strategy, state, state_reason, call_id, config_json, created_at, updated_at
         FROM sessions ORDER BY created_at DESC, session_id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], row_to_snapshot)?;

    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(decode_row(row?)?);
    }
    Ok(sessions)
}

/// Raw row shape before strategy/state labels are decoded.
type RawRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
);

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn decode_row(raw: RawRow) -> Result<SessionSnapshot, StoreError> {
    let (session_id, provider_type, strategy, state, state_reason, call_id, config_json, created_at, updated_at) =
        raw;
    let strategy = ProviderStrategy::parse(&strategy)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown strategy '{strategy}'")))?;
    let state = SessionState::parse(&state)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown state '{state}'")))?;
    let config = serde_json::from_str(&config_json)?;
    Ok(SessionSnapshot {
        session_id,
        provider_type,
        strategy,
        state,
        state_reason,
        call_id,
        config,
        created_at,
        updated_at,
    })
}

/// One persisted session event.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEventRow {
    pub id: i64,
    pub session_id: String,
    pub seq: i64,
    pub event_type: String,
    pub payload_json: String,
    pub occurred_at: String,
}

/// Appends an event to the session event log.
///
/// The sequence number is assigned inside the INSERT itself — the
/// subquery computes `COALESCE(MAX(seq), 0) + 1` within the same
/// statement, so two concurrent writers cannot observe the same MAX and
/// produce duplicates.
pub fn append_session_event(
    conn: &Connection,
    event: &SessionEvent,
) -> Result<SessionEventRow, StoreError> {
    let payload_json = serde_json::to_string(event)?;
    let session_id = event.session_id().to_string();
    let event_type = event.event_type();

    let row = conn.query_row(
        "INSERT INTO session_events (session_id, seq, event_type, payload_json, occurred_at)
         VALUES (
            ?1,
            (SELECT COALESCE(MAX(seq), 0) + 1 FROM session_events WHERE session_id = ?1),
            ?2,
            ?3,
            datetime('now')
         )
         RETURNING id, seq, occurred_at",
        params![session_id, event_type, payload_json],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    )?;

    let (id, seq, occurred_at) = row;
    Ok(SessionEventRow {
        id,
        session_id,
        seq,
        event_type: event_type.to_string(),
        payload_json,
        occurred_at,
    })
}

/// Lists a session's events in sequence order.
pub fn list_session_events(
    conn: &Connection,
    session_id: &str,
    limit: i64,
) -> Result<Vec<SessionEventRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, seq, event_type, payload_json, occurred_at
         FROM session_events WHERE session_id = ?1
         ORDER BY seq ASC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![session_id, limit], |row| {
        Ok(SessionEventRow {
            id: row.get(0)?,
            session_id: row.get(1)?,
            seq: row.get(2)?,
            event_type: row.get(3)?,
            payload_json: row.get(4)?,
            occurred_at: row.get(5)?,
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use trunkline_types::SessionConfig;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn snapshot(id: &str, state: SessionState) -> SessionSnapshot {
        SessionSnapshot {
            session_id: id.to_string(),
            provider_type: "mock".to_string(),
            strategy: ProviderStrategy::Realtime,
            state,
            state_reason: None,
            call_id: Some("CA1".to_string()),
            config: SessionConfig::new("model-a", 16_000),
            created_at: "2026-08-06T00:00:00Z".to_string(),
            updated_at: "2026-08-06T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn session_rows_round_trip() {
        let conn = setup();
        let snap = snapshot("s-1", SessionState::Idle);
        create_session(&conn, &snap).unwrap();

        let loaded = get_session(&conn, "s-1").unwrap().unwrap();
        assert_eq!(loaded, snap);

        let mut updated = snap.clone();
        updated.state = SessionState::Active;
        updated.updated_at = "2026-08-06T00:00:05Z".to_string();
        update_session(&conn, &updated).unwrap();
        assert_eq!(
            get_session(&conn, "s-1").unwrap().unwrap().state,
            SessionState::Active
        );

        delete_session(&conn, "s-1").unwrap();
        assert!(get_session(&conn, "s-1").unwrap().is_none());
    }

    #[test]
    fn missing_session_is_none_not_error() {
        let conn = setup();
        assert!(get_session(&conn, "nope").unwrap().is_none());
        delete_session(&conn, "nope").unwrap();
    }

    #[test]
    fn list_bounds_and_orders_newest_first() {
        let conn = setup();
        for (i, ts) in [(1, "2026-08-06T00:00:01Z"), (2, "2026-08-06T00:00:02Z"), (3, "2026-08-06T00:00:03Z")] {
            let mut snap = snapshot(&format!("s-{i}"), SessionState::Idle);
            snap.created_at = ts.to_string();
            create_session(&conn, &snap).unwrap();
        }
        let listed = list_sessions(&conn, 2).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].session_id, "s-3");
        assert_eq!(listed[1].session_id, "s-2");
    }

    #[test]
    fn event_log_assigns_per_session_sequence() {
        let conn = setup();
        let first = append_session_event(
            &conn,
            &SessionEvent::SessionCreated {
                session_id: "s-1".to_string(),
                provider_type: "mock".to_string(),
                call_id: None,
            },
        )
        .unwrap();
        let second = append_session_event(
            &conn,
            &SessionEvent::SessionEnded {
                session_id: "s-1".to_string(),
                state: SessionState::Disconnected,
                reason: Some("caller_hangup".to_string()),
            },
        )
        .unwrap();
        let other = append_session_event(
            &conn,
            &SessionEvent::SessionCreated {
                session_id: "s-2".to_string(),
                provider_type: "mock".to_string(),
                call_id: None,
            },
        )
        .unwrap();

        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(other.seq, 1, "sequence is per session");

        let events = list_session_events(&conn, "s-1", 100).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "session.created");
        assert_eq!(events[1].event_type, "session.ended");
    }
}
