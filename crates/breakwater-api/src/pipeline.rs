//! The challenge state machine driving one checked-out browser.
//!
//! A request moves through: navigate → observe → done, with challenge
//! detours. Native resolution (letting the widget's own JS run) gets a
//! bounded number of ticks; once it is exhausted and external solving is
//! enabled and configured, the solver chain takes over, and the result is
//! confirmed by observing again.

use crate::detect::{self, PageVerdict};
use crate::errors::ApiError;
use crate::validation;
use base64::Engine;
use breakwater_browser::PageHandle;
use breakwater_solver::{classify, SolverChain};
use breakwater_types::{
    ChallengeError, RateLimitCategory, RateLimitInfo, SolveOptions, SolveResult, SolverError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cadence of the observe loop.
const OBSERVE_TICK: Duration = Duration::from_secs(1);
/// Deadline for single bookkeeping evaluations (user agent, token probe).
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reads the turnstile response input, empty string when absent.
const TOKEN_PROBE_JS: &str = r#"(() => {
    const el = document.querySelector(
        'input[name="cf-turnstile-response"], textarea[name="cf-turnstile-response"]');
    return el && el.value ? el.value : '';
})()"#;

pub struct SolvePipeline {
    chain: Arc<SolverChain>,
}

impl SolvePipeline {
    pub fn new(chain: Arc<SolverChain>) -> Self {
        Self { chain }
    }

    /// Drive `page` through `opts` to a final response.
    pub async fn solve(
        &self,
        page: &dyn PageHandle,
        opts: &SolveOptions,
        cancel: &CancellationToken,
    ) -> Result<SolveResult, ApiError> {
        // The handler validates first; these re-checks keep the pipeline
        // safe against any other caller.
        validation::validate_target_url(&opts.url)?;
        validation::validate_cookies(&opts.cookies)?;
        validation::validate_headers(&opts.headers)?;
        validation::validate_post_data(opts.post_data.as_deref(), opts.is_post)?;

        let started = Instant::now();
        let deadline = started + opts.timeout;

        // Evasion payloads must be registered before the first navigation.
        breakwater_browser::stealth::prepare_page(page).await;

        if opts.disable_media {
            if let Err(e) = page.block_media().await {
                warn!(error = %e, "failed to disable media loading, continuing");
            }
        }
        // One CDP call carries both client headers and proxy credentials;
        // a second call would replace the first set.
        let mut extra_headers = opts.headers.clone();
        if let Some(proxy) = &opts.proxy {
            if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
                let credentials = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                extra_headers
                    .push(("Proxy-Authorization".to_string(), format!("Basic {}", credentials)));
            }
        }
        if !extra_headers.is_empty() {
            if let Err(e) = page.set_extra_headers(&extra_headers).await {
                warn!(error = %e, "failed to apply extra headers, continuing");
            }
        }
        if !opts.cookies.is_empty() {
            page.set_cookies(&opts.cookies, &opts.url).await?;
        }

        // Navigating
        let navigation = async {
            if opts.is_post {
                page.post(&opts.url, opts.post_data.as_deref().unwrap_or("")).await
            } else {
                page.navigate(&opts.url).await
            }
        };
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChallengeError::Canceled.into()),
            navigated = tokio::time::timeout_at(deadline, navigation) => match navigated {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(ChallengeError::Timeout(opts.timeout).into()),
            },
        };
        debug!(url = %opts.url, status = status, "navigation settled");

        let user_agent = self
            .probe_string(page, "navigator.userAgent", cancel)
            .await
            .unwrap_or_default();

        // Observing / NativeWait / ExternalSolving
        let mut ticks = 0u32;
        let mut challenged = false;
        let mut external_done = false;
        let mut turnstile_token: Option<String> = None;

        let html = loop {
            if cancel.is_cancelled() {
                return Err(ChallengeError::Canceled.into());
            }
            if Instant::now() >= deadline {
                return Err(ChallengeError::Timeout(opts.timeout).into());
            }

            let html = page.content().await?;
            match detect::inspect(&html) {
                PageVerdict::Clear => break html,
                PageVerdict::AccessDenied => {
                    let mut hints = classify(status, &html);
                    if !hints.detected {
                        hints = RateLimitInfo::detected(
                            "ACCESS_DENIED",
                            RateLimitCategory::AccessDenied,
                            30_000,
                            "access denied interstitial",
                        );
                    }
                    return Err(ChallengeError::AccessDenied(hints).into());
                }
                verdict @ (PageVerdict::Interstitial | PageVerdict::Widget) => {
                    challenged = true;

                    // Native resolution may already have produced a token.
                    if turnstile_token.is_none() {
                        if let Some(token) = self.probe_string(page, TOKEN_PROBE_JS, cancel).await {
                            debug!("turnstile token appeared natively");
                            turnstile_token = Some(token);
                        }
                    }
                    if verdict == PageVerdict::Widget && turnstile_token.is_some() {
                        // The page itself is the real content; a token is
                        // all that was missing.
                        break html;
                    }

                    ticks += 1;
                    if !external_done
                        && self.chain.is_enabled()
                        && self.chain.has_configured_provider()
                        && self.chain.should_fallback(ticks)
                    {
                        info!(url = %opts.url, ticks = ticks, "escalating to external solver");
                        match self.chain.solve(page, &opts.url, &user_agent, cancel).await {
                            Ok(solve) => {
                                turnstile_token = Some(solve.token);
                                external_done = true;
                                if verdict == PageVerdict::Widget {
                                    let html = page.content().await?;
                                    break html;
                                }
                                // Interstitials submit the token themselves;
                                // loop back around to confirm it cleared.
                            }
                            Err(SolverError::Canceled) => {
                                return Err(ChallengeError::Canceled.into());
                            }
                            Err(e) => {
                                return Err(ChallengeError::Unsolvable(e.to_string()).into());
                            }
                        }
                    }

                    let pause = OBSERVE_TICK.min(deadline.saturating_duration_since(Instant::now()));
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ChallengeError::Canceled.into()),
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }
        };

        // Post-challenge settle delay, clamped to the remaining budget.
        let wait = opts
            .clamped_wait()
            .min(deadline.saturating_duration_since(Instant::now()));
        let html = if wait > Duration::ZERO {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChallengeError::Canceled.into()),
                _ = tokio::time::sleep(wait) => {}
            }
            page.content().await?
        } else {
            html
        };

        let cookies = page.cookies().await?;
        let final_url = page.url().await.unwrap_or_else(|_| opts.url.clone());
        let screenshot = if opts.screenshot {
            match page.screenshot().await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "screenshot capture failed");
                    None
                }
            }
        } else {
            None
        };

        // A cleared challenge means the real content loaded after the
        // interstitial's status; report the solved page, not the detour.
        // Status 0 means the driver never saw the document response.
        let status_code = if challenged || status == 0 { 200 } else { status };

        if challenged {
            info!(url = %final_url, elapsed_ms = started.elapsed().as_millis() as u64, "challenge solved");
        }

        Ok(SolveResult {
            url: final_url,
            html,
            status_code,
            cookies,
            user_agent,
            screenshot,
            turnstile_token,
        })
    }

    /// Evaluate a short expression, treating failures and empties as None.
    async fn probe_string(
        &self,
        page: &dyn PageHandle,
        script: &str,
        cancel: &CancellationToken,
    ) -> Option<String> {
        if cancel.is_cancelled() {
            return None;
        }
        let evaluated = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            evaluated = tokio::time::timeout(PROBE_TIMEOUT, page.evaluate(script)) => evaluated,
        };
        match evaluated {
            Ok(Ok(serde_json::Value::String(s))) if !s.is_empty() => Some(s),
            _ => None,
        }
    }
}
