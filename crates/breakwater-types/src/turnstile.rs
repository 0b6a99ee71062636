//! Turnstile solving data model shared by the solver chain and providers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// What an external provider needs to produce a token.
#[derive(Debug, Clone)]
pub struct TurnstileRequest {
    pub site_key: String,
    pub page_url: String,
    pub user_agent: String,
    /// Value of the widget's `data-action` attribute, when present.
    pub action: Option<String>,
    /// Value of the widget's `data-cdata` attribute, when present.
    pub cdata: Option<String>,
}

impl TurnstileRequest {
    pub fn new(
        site_key: impl Into<String>,
        page_url: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            site_key: site_key.into(),
            page_url: page_url.into(),
            user_agent: user_agent.into(),
            action: None,
            cdata: None,
        }
    }
}

/// A solved token as returned by a provider.
#[derive(Debug, Clone)]
pub struct TurnstileResult {
    pub token: String,
    pub solve_time: Duration,
    /// USD. Providers that do not quote per-solve report an estimate.
    pub cost: f64,
    pub provider_name: String,
}

/// Per-provider rollup counters. All updates happen under the metrics lock;
/// reads hand out a value copy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_cost: f64,
    pub total_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
}

impl ProviderStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}
