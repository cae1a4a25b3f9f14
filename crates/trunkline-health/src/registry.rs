//! The injected health registry and selection policy.

use crate::record::{HealthPolicy, HealthStats, ProviderHealth};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use trunkline_types::ProviderStrategy;

/// Static configuration for one provider instance, as registered at
/// startup. Health statistics live alongside it inside the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEntry {
    /// Unique instance name (config key).
    pub name: String,
    /// Provider family label (reported as a session's `provider_type`).
    pub kind: String,
    /// Behavioral contract this instance implements.
    pub strategy: ProviderStrategy,
    /// Selection priority; lower is preferred.
    pub priority: u32,
    /// Operator kill switch.
    pub is_enabled: bool,
}

struct Slot {
    entry: ProviderEntry,
    stats: HealthStats,
}

/// Rolling health records for every configured provider instance.
///
/// All mutation is O(1) per session behind a single brief mutex — no
/// acquisition spans an `.await`, and nothing iterates the map while
/// holding the lock longer than a sort over the (small) candidate set.
pub struct HealthRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    policy: HealthPolicy,
}

impl HealthRegistry {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Registers a provider instance. Re-registering an existing name
    /// replaces its configuration but keeps its accumulated statistics.
    pub fn register(&self, entry: ProviderEntry) {
        let mut slots = self.slots.lock().expect("health registry lock poisoned");
        match slots.get_mut(&entry.name) {
            Some(slot) => slot.entry = entry,
            None => {
                slots.insert(
                    entry.name.clone(),
                    Slot {
                        entry,
                        stats: HealthStats::new(),
                    },
                );
            }
        }
    }

    /// Records a successful connect attempt with its observed latency.
    pub fn record_success(&self, name: &str, latency: Duration) {
        let mut slots = self.slots.lock().expect("health registry lock poisoned");
        if let Some(slot) = slots.get_mut(name) {
            slot.stats.record_success(latency);
        }
    }

    /// Records a failed connect attempt. Crossing the failure threshold
    /// marks the provider unhealthy for the cool-down window.
    pub fn record_failure(&self, name: &str) {
        let mut slots = self.slots.lock().expect("health registry lock poisoned");
        if let Some(slot) = slots.get_mut(name) {
            slot.stats.record_failure(&self.policy);
            if !slot.stats.is_healthy() {
                tracing::warn!(
                    provider = name,
                    consecutive_failures = slot.stats.consecutive_failures,
                    cooldown_secs = self.policy.cooldown_secs,
                    "provider crossed failure threshold, entering cool-down"
                );
            }
        }
    }

    /// Records a session teardown and whether it ended in error.
    pub fn record_session_end(&self, name: &str, had_error: bool) {
        let mut slots = self.slots.lock().expect("health registry lock poisoned");
        if let Some(slot) = slots.get_mut(name) {
            slot.stats.record_session_end(had_error);
        }
    }

    /// Point-in-time health snapshot for one provider.
    pub fn snapshot(&self, name: &str) -> Option<ProviderHealth> {
        let slots = self.slots.lock().expect("health registry lock poisoned");
        slots.get(name).map(|slot| slot.stats.snapshot())
    }

    /// Health snapshots for every registered provider, for status APIs.
    pub fn snapshot_all(&self) -> Vec<(ProviderEntry, ProviderHealth)> {
        let slots = self.slots.lock().expect("health registry lock poisoned");
        let mut all: Vec<_> = slots
            .values()
            .map(|slot| (slot.entry.clone(), slot.stats.snapshot()))
            .collect();
        all.sort_by_key(|(entry, _)| (entry.priority, entry.name.clone()));
        all
    }

    /// Selection candidates for a new session: enabled and healthy,
    /// sorted ascending by priority, then ascending by error rate.
    ///
    /// The caller attempts these in order exactly once each — a one-shot
    /// fallback chain, never a retry loop over the same instance.
    pub fn candidates(&self) -> Vec<ProviderEntry> {
        let slots = self.slots.lock().expect("health registry lock poisoned");
        let mut selectable: Vec<(&Slot, f64)> = slots
            .values()
            .filter(|slot| slot.entry.is_enabled && slot.stats.is_healthy())
            .map(|slot| (slot, slot.stats.error_rate()))
            .collect();
        selectable.sort_by(|(a, a_err), (b, b_err)| {
            a.entry
                .priority
                .cmp(&b.entry.priority)
                .then(a_err.total_cmp(b_err))
                .then_with(|| a.entry.name.cmp(&b.entry.name))
        });
        selectable
            .into_iter()
            .map(|(slot, _)| slot.entry.clone())
            .collect()
    }
}
