//! Persistence layer for the Trunkline voice engine.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode
//! initialization, embedded SQL migrations, and the session/event-log
//! query helpers. Sessions are mirrored here so they survive process
//! restarts; the engine treats this store as an opaque collaborator and
//! keeps running memory-only if it becomes unavailable.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single-process engine needs no external
//!   database; WAL allows concurrent readers with one writer, matching
//!   the registry's single-writer access pattern.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **Embedded migrations**: SQL ships inside the binary via
//!   `include_str!` and cannot drift from the code that depends on it.

mod error;
mod migrations;
mod pool;
mod sessions;

pub use error::StoreError;
pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool, DbRuntimeSettings};
pub use sessions::{
    append_session_event, create_session, delete_session, get_session, list_session_events,
    list_sessions, update_session, SessionEventRow,
};
