//! Provider health tracking and failover selection.
//!
//! Every configured provider instance carries a rolling
//! [`ProviderHealth`] record, updated on every connect attempt and every
//! session teardown. The [`HealthRegistry`] is an explicit, injected
//! object with internal synchronization — never a process-wide singleton —
//! so tests get isolation and one process can host independent
//! deployments.
//!
//! Selection policy for a new session: filter to enabled and healthy,
//! sort ascending by priority then by error rate, attempt candidates in
//! order exactly once each. A provider whose consecutive failures cross
//! the configured threshold is excluded until its cool-down window
//! elapses.

mod record;
mod registry;

pub use record::{HealthPolicy, ProviderHealth};
pub use registry::{HealthRegistry, ProviderEntry};
