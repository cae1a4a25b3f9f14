//! The persistent session store seam.
//!
//! The registry mirrors every session mutation through a [`SessionStore`].
//! The store is an opaque collaborator: when it fails, the registry logs
//! loudly and keeps operating memory-only, so a storage outage never
//! takes down live calls.

use async_trait::async_trait;
use trunkline_db::{DbPool, StoreError};
use trunkline_types::{SessionEvent, SessionSnapshot};

/// Persistence operations the registry needs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError>;
    async fn update(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError>;
    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;
    async fn append_event(&self, event: &SessionEvent) -> Result<(), StoreError>;
    async fn load_recent(&self, limit: i64) -> Result<Vec<SessionSnapshot>, StoreError>;
}

/// SQLite-backed store over the shared connection pool.
///
/// rusqlite is synchronous, so every operation hops to the blocking
/// thread pool — the same pattern the HTTP handlers use for direct
/// queries.
pub struct SqliteSessionStore {
    pool: DbPool,
}

impl SqliteSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            op(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let snapshot = snapshot.clone();
        self.run(move |conn| trunkline_db::create_session(conn, &snapshot))
            .await
    }

    async fn update(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let snapshot = snapshot.clone();
        self.run(move |conn| trunkline_db::update_session(conn, &snapshot))
            .await
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.run(move |conn| trunkline_db::delete_session(conn, &session_id))
            .await
    }

    async fn append_event(&self, event: &SessionEvent) -> Result<(), StoreError> {
        let event = event.clone();
        self.run(move |conn| trunkline_db::append_session_event(conn, &event).map(|_| ()))
            .await
    }

    async fn load_recent(&self, limit: i64) -> Result<Vec<SessionSnapshot>, StoreError> {
        self.run(move |conn| trunkline_db::list_sessions(conn, limit))
            .await
    }
}
