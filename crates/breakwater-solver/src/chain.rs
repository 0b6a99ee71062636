//! Ordered fan-out across configured external providers.

use crate::metrics::SolverMetrics;
use crate::providers::CaptchaProvider;
use crate::turnstile::{extract_sitekey, inject_token};
use breakwater_browser::PageHandle;
use breakwater_types::{SolverError, SolverSettings, TurnstileRequest};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_NATIVE_ATTEMPTS: u32 = 3;

/// Normalise the configured native-attempt count: 0 means "use the
/// default", everything else lands in [1, 10].
pub fn normalize_native_attempts(n: u32) -> u32 {
    if n == 0 {
        DEFAULT_NATIVE_ATTEMPTS
    } else {
        n.clamp(1, 10)
    }
}

/// A completed external solve.
#[derive(Debug, Clone)]
pub struct ChainSolve {
    pub token: String,
    pub provider: String,
    pub solve_time: Duration,
    pub cost: f64,
    /// Whether any injection strategy stuck. A failed injection still
    /// returns the token to the caller.
    pub injected: bool,
}

/// Tries each configured provider in order until one produces a token.
pub struct SolverChain {
    providers: Vec<Arc<dyn CaptchaProvider>>,
    metrics: Arc<SolverMetrics>,
    native_attempts: u32,
    fallback_enabled: bool,
}

impl SolverChain {
    pub fn new(
        settings: &SolverSettings,
        providers: Vec<Arc<dyn CaptchaProvider>>,
        metrics: Arc<SolverMetrics>,
    ) -> Self {
        Self {
            providers,
            metrics,
            native_attempts: normalize_native_attempts(settings.native_attempts),
            fallback_enabled: settings.fallback_enabled,
        }
    }

    /// Escalate to external solving once native resolution has burned
    /// through its attempt budget.
    pub fn should_fallback(&self, attempts: u32) -> bool {
        self.fallback_enabled && attempts >= self.native_attempts
    }

    pub fn native_attempts(&self) -> u32 {
        self.native_attempts
    }

    pub fn is_enabled(&self) -> bool {
        self.fallback_enabled
    }

    pub fn has_configured_provider(&self) -> bool {
        self.providers.iter().any(|p| p.is_configured())
    }

    pub fn metrics(&self) -> &Arc<SolverMetrics> {
        &self.metrics
    }

    /// Query every configured provider's account balance and record it.
    /// Run at startup so operators see broken credentials immediately.
    pub async fn refresh_balances(&self) {
        for provider in &self.providers {
            if !provider.is_configured() {
                continue;
            }
            match provider.balance().await {
                Ok(balance) => {
                    info!(provider = provider.name(), balance_usd = balance, "provider balance");
                    self.metrics.record_balance(provider.name(), balance);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "balance query failed");
                    self.metrics.record_error(provider.name(), &e.to_string());
                }
            }
        }
    }

    /// Extract the sitekey, fan out across providers in order, inject the
    /// first token that comes back.
    pub async fn solve(
        &self,
        page: &dyn PageHandle,
        page_url: &str,
        user_agent: &str,
        cancel: &CancellationToken,
    ) -> Result<ChainSolve, SolverError> {
        let sitekey = extract_sitekey(page, cancel).await?;
        let mut request = TurnstileRequest::new(sitekey.site_key, page_url, user_agent);
        request.action = sitekey.action;
        request.cdata = sitekey.cdata;

        let mut last_error = None;
        let mut any_ran = false;

        for provider in &self.providers {
            if !provider.is_configured() {
                debug!(provider = provider.name(), "skipping unconfigured provider");
                continue;
            }
            any_ran = true;

            let started = Instant::now();
            info!(provider = provider.name(), page_url = %request.page_url, "dispatching turnstile solve");
            match provider.solve_turnstile(&request, cancel).await {
                Ok(result) => {
                    let duration = started.elapsed();
                    self.metrics
                        .record_attempt(provider.name(), true, result.cost, duration);

                    let injected = match inject_token(page, &result.token, cancel).await {
                        Ok(()) => true,
                        Err(SolverError::Canceled) => return Err(SolverError::Canceled),
                        Err(e) => {
                            // The token is still valid; callers may present
                            // it themselves.
                            warn!(provider = provider.name(), error = %e, "token injection failed");
                            false
                        }
                    };
                    info!(
                        provider = provider.name(),
                        solve_time_ms = result.solve_time.as_millis() as u64,
                        injected = injected,
                        "turnstile solved"
                    );
                    return Ok(ChainSolve {
                        token: result.token,
                        provider: result.provider_name,
                        solve_time: result.solve_time,
                        cost: result.cost,
                        injected,
                    });
                }
                Err(SolverError::Canceled) => return Err(SolverError::Canceled),
                Err(e) => {
                    self.metrics
                        .record_attempt(provider.name(), false, 0.0, started.elapsed());
                    self.metrics.record_error(provider.name(), &e.to_string());
                    warn!(provider = provider.name(), error = %e, "provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        if !any_ran {
            return Err(SolverError::NoProvidersConfigured);
        }
        Err(last_error.unwrap_or(SolverError::NoProvidersConfigured))
    }
}
