//! Session state machine, registry, and the per-session pump tasks.
//!
//! A [`Session`](trunkline_types::SessionSnapshot) binds one telephony
//! call leg to one provider connection. The [`SessionRegistry`] is the
//! single writer of session state: every transition goes through it, is
//! validated against the lifecycle table, mirrored to the persistent
//! store, and broadcast to consumers as a
//! [`SessionEvent`](trunkline_types::SessionEvent).
//!
//! The [`VoiceEngine`] owns the concurrency model: each session gets
//! exactly two cooperative pump tasks — telephony→provider audio and
//! provider→telephony events — cancelled together under a bounded
//! teardown timeout. Provider failures are caught at the pump boundary
//! and become state-machine transitions (one failover reconnect at most),
//! never process-crashing panics.

mod engine;
mod error;
mod registry;
mod store;

pub use engine::{CallLeg, EngineConfig, ProviderFactory, VoiceEngine};
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use store::{SessionStore, SqliteSessionStore};
