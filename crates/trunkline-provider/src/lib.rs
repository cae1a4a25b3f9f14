//! Provider capability protocol for the Trunkline voice engine.
//!
//! Two behavioral contracts cover every AI voice backend:
//!
//! - [`RealtimeEndToEndProvider`] — integrated audio↔audio models that
//!   accept and emit audio directly.
//! - [`SegmentedVoiceProvider`] — pipelines assembled from independent
//!   speech-recognition, language-model, and speech-synthesis stages.
//!
//! Both share one surface. [`VoiceProvider`] wraps a boxed implementation
//! of either contract behind a strategy tag; callers branch on the tag
//! exactly once, at session creation, and never again.
//!
//! Provider output reaches the engine through a bounded event channel
//! with explicit backpressure: when the consumer falls behind, the
//! producer blocks rather than buffering without bound.

mod error;
mod event;
pub mod realtime;
pub mod segmented;
mod traits;

pub use error::ProviderError;
pub use event::{ProviderEvent, DEFAULT_EVENT_CAPACITY};
pub use realtime::{RealtimeSettings, RealtimeWsProvider};
pub use segmented::{SegmentedHttpProvider, SegmentedSettings};
pub use traits::{RealtimeEndToEndProvider, SegmentedVoiceProvider, VoiceProvider};
