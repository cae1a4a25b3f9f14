//! Shared types and constants for the Trunkline voice engine.
//!
//! This crate provides the foundational types used across all Trunkline
//! crates: audio frames and formats, carrier call identity, session
//! lifecycle state, provider capability descriptors, and the event
//! envelopes consumers receive.
//!
//! No crate in the workspace depends on anything *except* `trunkline-types`
//! for cross-cutting type definitions. This keeps the dependency graph
//! clean and prevents circular dependencies.

pub mod audio;
pub mod call;
pub mod event;
pub mod provider;
pub mod session;

pub use audio::{AudioChunk, AudioFormat};
pub use call::{CallDirection, CallInfo, CallParams, CallState, CallUpdate};
pub use event::{SessionEvent, TranscriptRole};
pub use provider::{CostTier, ProviderCapabilities, ProviderStrategy};
pub use session::{SessionConfig, SessionSnapshot, SessionState, ToolSpec};

/// Native sample rate of narrowband telephony legs, in Hz.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;
