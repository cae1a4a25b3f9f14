//! Rolling health records.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How many recent connect latencies feed the percentile estimates.
const LATENCY_WINDOW: usize = 64;

/// Thresholds governing when a provider is considered unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Consecutive connect failures before the provider is marked
    /// unhealthy.
    pub failure_threshold: u32,
    /// How long an unhealthy provider stays excluded from selection.
    pub cooldown_secs: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 60,
        }
    }
}

impl HealthPolicy {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Point-in-time health snapshot for one provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Whether the provider is currently selectable.
    pub is_healthy: bool,
    /// Connect failures since the last success.
    pub consecutive_failures: u32,
    /// Fraction of connect attempts that succeeded. 1.0 with no history.
    pub success_rate: f64,
    /// Median connect latency over the rolling window, milliseconds.
    pub latency_p50_ms: Option<u64>,
    /// 95th-percentile connect latency, milliseconds.
    pub latency_p95_ms: Option<u64>,
    /// 99th-percentile connect latency, milliseconds.
    pub latency_p99_ms: Option<u64>,
    /// When the record last changed, ISO 8601.
    pub last_check: Option<String>,
}

/// Mutable per-provider statistics behind the registry lock.
#[derive(Debug)]
pub(crate) struct HealthStats {
    pub(crate) consecutive_failures: u32,
    pub(crate) attempts: u64,
    pub(crate) successes: u64,
    pub(crate) session_ends: u64,
    pub(crate) session_errors: u64,
    pub(crate) latencies_ms: VecDeque<u64>,
    pub(crate) cooldown_until: Option<Instant>,
    pub(crate) last_check: Option<String>,
}

impl HealthStats {
    pub(crate) fn new() -> Self {
        Self {
            consecutive_failures: 0,
            attempts: 0,
            successes: 0,
            session_ends: 0,
            session_errors: 0,
            latencies_ms: VecDeque::with_capacity(LATENCY_WINDOW),
            cooldown_until: None,
            last_check: None,
        }
    }

    pub(crate) fn record_success(&mut self, latency: Duration) {
        self.attempts += 1;
        self.successes += 1;
        self.consecutive_failures = 0;
        self.cooldown_until = None;
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency.as_millis() as u64);
        self.touch();
    }

    pub(crate) fn record_failure(&mut self, policy: &HealthPolicy) {
        self.attempts += 1;
        self.consecutive_failures += 1;
        if self.consecutive_failures >= policy.failure_threshold {
            self.cooldown_until = Some(Instant::now() + policy.cooldown());
        }
        self.touch();
    }

    pub(crate) fn record_session_end(&mut self, had_error: bool) {
        self.session_ends += 1;
        if had_error {
            self.session_errors += 1;
        }
        self.touch();
    }

    /// Selectable right now: no cool-down in effect, or the window has
    /// elapsed (half-open — the next failure re-trips it immediately).
    pub(crate) fn is_healthy(&self) -> bool {
        match self.cooldown_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    /// Connect error rate plus session error contribution, the sort key
    /// after priority.
    pub(crate) fn error_rate(&self) -> f64 {
        let connect = if self.attempts == 0 {
            0.0
        } else {
            1.0 - self.successes as f64 / self.attempts as f64
        };
        let session = if self.session_ends == 0 {
            0.0
        } else {
            self.session_errors as f64 / self.session_ends as f64
        };
        // Connect failures dominate; session errors break ties.
        connect + session * 0.5
    }

    pub(crate) fn snapshot(&self) -> ProviderHealth {
        let mut sorted: Vec<u64> = self.latencies_ms.iter().copied().collect();
        sorted.sort_unstable();
        ProviderHealth {
            is_healthy: self.is_healthy(),
            consecutive_failures: self.consecutive_failures,
            success_rate: if self.attempts == 0 {
                1.0
            } else {
                self.successes as f64 / self.attempts as f64
            },
            latency_p50_ms: percentile(&sorted, 0.50),
            latency_p95_ms: percentile(&sorted, 0.95),
            latency_p99_ms: percentile(&sorted, 0.99),
            last_check: self.last_check.clone(),
        }
    }

    fn touch(&mut self) {
        self.last_check = Some(chrono::Utc::now().to_rfc3339());
    }
}

fn percentile(sorted: &[u64], q: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((sorted.len() as f64 - 1.0) * q).round() as usize;
    Some(sorted[rank])
}
