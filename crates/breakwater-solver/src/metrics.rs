//! Per-provider solve metrics.
//!
//! Updates are serialised under one write lock; readers get value copies, so
//! a snapshot is consistent per provider but not across providers. Built at
//! startup and passed around explicitly; there is no global registry.

use breakwater_types::ProviderStats;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

#[derive(Default)]
pub struct SolverMetrics {
    providers: RwLock<HashMap<String, ProviderStats>>,
}

impl SolverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one solve attempt. Failed attempts contribute zero cost.
    pub fn record_attempt(&self, provider: &str, success: bool, cost: f64, duration: Duration) {
        let mut providers = self.providers.write().expect("metrics lock poisoned");
        let stats = providers.entry(provider.to_string()).or_default();
        stats.attempts += 1;
        if success {
            stats.successes += 1;
            stats.total_cost += cost;
        } else {
            stats.failures += 1;
        }
        stats.total_time_ms += duration.as_millis() as u64;
        stats.last_used = Some(Utc::now());
    }

    pub fn record_balance(&self, provider: &str, balance: f64) {
        let mut providers = self.providers.write().expect("metrics lock poisoned");
        providers.entry(provider.to_string()).or_default().last_balance = Some(balance);
    }

    pub fn record_error(&self, provider: &str, error: &str) {
        let mut providers = self.providers.write().expect("metrics lock poisoned");
        let stats = providers.entry(provider.to_string()).or_default();
        stats.last_error = Some(error.to_string());
        stats.last_error_at = Some(Utc::now());
    }

    /// Value copy of one provider's counters.
    pub fn provider(&self, provider: &str) -> Option<ProviderStats> {
        self.providers
            .read()
            .expect("metrics lock poisoned")
            .get(provider)
            .cloned()
    }

    /// Per-provider rollup plus a `_summary` aggregate.
    pub fn to_json(&self) -> Value {
        let providers = self.providers.read().expect("metrics lock poisoned");

        let mut attempts = 0u64;
        let mut successes = 0u64;
        let mut failures = 0u64;
        let mut total_cost = 0.0f64;

        let mut out = serde_json::Map::new();
        for (name, stats) in providers.iter() {
            attempts += stats.attempts;
            successes += stats.successes;
            failures += stats.failures;
            total_cost += stats.total_cost;

            let mut entry = serde_json::to_value(stats).expect("stats serialize");
            entry["success_rate"] = json!(stats.success_rate());
            out.insert(name.clone(), entry);
        }

        let success_rate = if attempts == 0 {
            0.0
        } else {
            successes as f64 / attempts as f64
        };
        out.insert(
            "_summary".to_string(),
            json!({
                "attempts": attempts,
                "successes": successes,
                "failures": failures,
                "total_cost": total_cost,
                "success_rate": success_rate,
            }),
        );

        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_always_equal_successes_plus_failures() {
        let metrics = SolverMetrics::new();
        let outcomes = [true, false, true, true, false, false, false, true];
        for (i, &success) in outcomes.iter().enumerate() {
            metrics.record_attempt("2captcha", success, 0.002, Duration::from_millis(i as u64));
        }

        let stats = metrics.provider("2captcha").unwrap();
        assert_eq!(stats.attempts, stats.successes + stats.failures);
        assert_eq!(stats.attempts, 8);
        assert_eq!(stats.successes, 4);
    }

    #[test]
    fn only_successful_attempts_accrue_cost() {
        let metrics = SolverMetrics::new();
        metrics.record_attempt("capsolver", true, 0.0025, Duration::from_secs(3));
        metrics.record_attempt("capsolver", false, 0.0025, Duration::from_secs(3));
        metrics.record_attempt("capsolver", true, 0.0025, Duration::from_secs(3));

        let stats = metrics.provider("capsolver").unwrap();
        assert!((stats.total_cost - 0.005).abs() < 1e-9);
    }

    #[test]
    fn summary_aggregates_across_providers() {
        let metrics = SolverMetrics::new();
        metrics.record_attempt("2captcha", true, 0.002, Duration::from_secs(10));
        metrics.record_attempt("capsolver", false, 0.0, Duration::from_secs(5));

        let json = metrics.to_json();
        assert_eq!(json["_summary"]["attempts"], 2);
        assert_eq!(json["_summary"]["successes"], 1);
        assert_eq!(json["_summary"]["failures"], 1);
        assert_eq!(json["2captcha"]["attempts"], 1);
        assert_eq!(json["capsolver"]["failures"], 1);
        assert!((json["_summary"]["success_rate"].as_f64().unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn balance_and_error_are_tracked() {
        let metrics = SolverMetrics::new();
        metrics.record_balance("2captcha", 4.2);
        metrics.record_error("2captcha", "ERROR_NO_SLOT_AVAILABLE");

        let stats = metrics.provider("2captcha").unwrap();
        assert_eq!(stats.last_balance, Some(4.2));
        assert_eq!(stats.last_error.as_deref(), Some("ERROR_NO_SLOT_AVAILABLE"));
        assert!(stats.last_error_at.is_some());
    }
}
