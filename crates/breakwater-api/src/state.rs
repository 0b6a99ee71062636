//! Shared application state.

use crate::pipeline::SolvePipeline;
use breakwater_browser::{BrowserPool, SessionManager};
use breakwater_solver::{SolverChain, SolverMetrics};
use breakwater_types::AppConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Everything a handler needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pool: Arc<BrowserPool>,
    pub sessions: Arc<SessionManager>,
    pub chain: Arc<SolverChain>,
    pub metrics: Arc<SolverMetrics>,
    pub pipeline: Arc<SolvePipeline>,
    pub domains: Arc<DomainStats>,
    pub started_at: Instant,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DomainCounters {
    pub requests: u64,
    pub challenges: u64,
    pub solved: u64,
    pub failures: u64,
    pub rate_limited: u64,
}

/// Per-domain solve counters for /health reporting.
#[derive(Default)]
pub struct DomainStats {
    inner: RwLock<HashMap<String, DomainCounters>>,
}

impl DomainStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, host: &str, f: impl FnOnce(&mut DomainCounters)) {
        if host.is_empty() {
            return;
        }
        let mut inner = self.inner.write().expect("domain stats lock poisoned");
        f(inner.entry(host.to_string()).or_default());
    }

    pub fn record_request(&self, host: &str) {
        self.update(host, |c| c.requests += 1);
    }

    pub fn record_challenge(&self, host: &str) {
        self.update(host, |c| c.challenges += 1);
    }

    pub fn record_solved(&self, host: &str) {
        self.update(host, |c| c.solved += 1);
    }

    pub fn record_failure(&self, host: &str) {
        self.update(host, |c| c.failures += 1);
    }

    pub fn record_rate_limited(&self, host: &str) {
        self.update(host, |c| c.rate_limited += 1);
    }

    pub fn snapshot(&self) -> HashMap<String, DomainCounters> {
        self.inner
            .read()
            .expect("domain stats lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_domain() {
        let stats = DomainStats::new();
        stats.record_request("example.com");
        stats.record_request("example.com");
        stats.record_challenge("example.com");
        stats.record_solved("example.com");
        stats.record_request("other.org");
        stats.record_rate_limited("other.org");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot["example.com"].requests, 2);
        assert_eq!(snapshot["example.com"].challenges, 1);
        assert_eq!(snapshot["example.com"].solved, 1);
        assert_eq!(snapshot["other.org"].rate_limited, 1);
    }

    #[test]
    fn empty_hosts_are_ignored() {
        let stats = DomainStats::new();
        stats.record_request("");
        assert!(stats.snapshot().is_empty());
    }
}
