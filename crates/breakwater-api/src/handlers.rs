//! Command dispatch: binds the HTTP envelope to pool, sessions and
//! pipeline.

use crate::errors::ApiError;
use crate::models::{Solution, V1Request, V1Response};
use crate::state::AppState;
use crate::validation;
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use base64::Engine;
use breakwater_solver::classify;
use breakwater_types::{RateLimitCategory, SolveOptions, SolveResult};
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Commands the dispatcher accepts; anything else is `invalid_command`.
const VALID_COMMANDS: &[&str] = &[
    "request.get",
    "request.post",
    "sessions.create",
    "sessions.list",
    "sessions.destroy",
];

/// Grace on top of the per-request budget before the handler gives up on a
/// wedged solve outright.
const HARD_TIMEOUT_GRACE: Duration = Duration::from_secs(10);

pub async fn index(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "msg": "breakwater is ready",
        "version": env!("CARGO_PKG_VERSION"),
        "poolSize": state.pool.status().size,
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "pool": state.pool.status(),
        "sessions": {
            "active": state.sessions.count().await,
            "max": state.config.session.max_sessions,
        },
        "solver": {
            "fallbackEnabled": state.chain.is_enabled(),
            "nativeAttempts": state.chain.native_attempts(),
            "configured": state.chain.has_configured_provider(),
            "providers": state.metrics.to_json(),
        },
        "domains": state.domains.snapshot(),
    }))
}

/// `POST /v1` and `POST /api`. The body is decoded by hand so malformed
/// JSON still yields the compatibility envelope, and the reply is fully
/// serialised before any header is committed.
pub async fn command(State(state): State<AppState>, body: Bytes) -> Json<V1Response> {
    let started = Utc::now().timestamp_millis();

    let request: V1Request = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "rejecting malformed command body");
            return Json(V1Response::error(format!("invalid request body: {}", e), started));
        }
    };

    if !VALID_COMMANDS.contains(&request.cmd.as_str()) {
        return Json(V1Response::error(
            format!("invalid command: {}", request.cmd),
            started,
        ));
    }

    let response = match request.cmd.as_str() {
        "request.get" => handle_request(&state, request, false, started).await,
        "request.post" => handle_request(&state, request, true, started).await,
        "sessions.create" => handle_session_create(&state, request, started).await,
        "sessions.list" => handle_session_list(&state, started).await,
        "sessions.destroy" => handle_session_destroy(&state, request, started).await,
        _ => unreachable!("command list is checked above"),
    };
    Json(response)
}

fn error_response(err: &ApiError, started: i64) -> V1Response {
    let mut response = V1Response::error(err.to_string(), started);
    if let Some(info) = err.rate_limit_info() {
        response = response.with_rate_limit_info(info);
    }
    response
}

async fn handle_request(
    state: &AppState,
    request: V1Request,
    is_post: bool,
    started: i64,
) -> V1Response {
    let prepared = match prepare_options(state, &request, is_post) {
        Ok(prepared) => prepared,
        Err(e) => return error_response(&e, started),
    };
    let (opts, host) = prepared;

    info!(
        cmd = %request.cmd,
        url = %redacted_target(&opts.url),
        session = request.session.as_deref().unwrap_or(""),
        timeout_ms = opts.timeout.as_millis() as u64,
        "handling request"
    );
    state.domains.record_request(&host);

    // The token cancels when this future is dropped (client gone, hard
    // timeout), pulling the rug from under any in-flight solver work.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let hard_budget = opts.timeout + HARD_TIMEOUT_GRACE;
    let solved = tokio::time::timeout(
        hard_budget,
        solve_on_target(state, &request, &opts, &cancel),
    )
    .await
    .unwrap_or_else(|_| {
        Err(ApiError::Challenge(breakwater_types::ChallengeError::Timeout(
            opts.timeout,
        )))
    });

    match solved {
        Ok(result) => {
            let hints = classify(result.status_code, &result.html);
            if hints.category == Some(RateLimitCategory::RateLimit) {
                state.domains.record_rate_limited(&host);
            }
            if result.turnstile_token.is_some() {
                state.domains.record_challenge(&host);
                state.domains.record_solved(&host);
            }

            let message = if result.turnstile_token.is_some() {
                "Challenge solved!"
            } else {
                "Challenge not detected!"
            };
            let mut solution = build_solution(result, &request);
            solution.apply_rate_limit_info(&hints);
            V1Response::ok(message, started).with_solution(solution)
        }
        Err(e) => {
            state.domains.record_failure(&host);
            warn!(error = %e, error_type = e.error_type(), "request failed");
            error_response(&e, started)
        }
    }
}

/// Resolve the browser (session-bound, dedicated, or pooled) and run the
/// pipeline on it. Every path returns its browser before this resolves.
async fn solve_on_target(
    state: &AppState,
    request: &V1Request,
    opts: &SolveOptions,
    cancel: &CancellationToken,
) -> Result<SolveResult, ApiError> {
    if let Some(session_id) = &request.session {
        validation::validate_session_id(session_id)?;
        let session = state.sessions.get(session_id).await?;
        // Serialise page access for this session; concurrent requests
        // against the same id queue up here.
        let guard = session.lock().await;
        let page = guard.page()?;
        return state.pipeline.solve(page, opts, cancel).await;
    }

    let lease = if let Some(proxy) = &opts.proxy {
        // A browser binds its proxy at launch, so request-scoped proxies
        // get a dedicated instance for the duration of this request.
        state.pool.acquire_dedicated(&proxy.url).await?
    } else {
        state.pool.acquire(cancel).await?
    };

    let solved = match lease.instance().new_page().await {
        Ok(page) => {
            let solved = state.pipeline.solve(page.as_ref(), opts, cancel).await;
            if let Err(e) = page.close().await {
                warn!(error = %e, "failed to close request page");
            }
            solved
        }
        Err(e) => Err(e.into()),
    };
    lease.release().await;
    solved
}

fn prepare_options(
    state: &AppState,
    request: &V1Request,
    is_post: bool,
) -> Result<(SolveOptions, String), ApiError> {
    let raw_url = request
        .url
        .as_deref()
        .ok_or(breakwater_types::RequestError::UrlRequired)?;
    let url = validation::validate_target_url(raw_url)?;
    validation::validate_cookies(&request.cookies)?;
    validation::validate_post_data(request.post_data.as_deref(), is_post)?;
    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    headers.sort();
    validation::validate_headers(&headers)?;
    if let Some(proxy) = &request.proxy {
        validation::validate_proxy(proxy, state.config.allow_local_proxies)?;
    }

    let timeout = state
        .config
        .clamp_timeout(request.max_timeout.map(Duration::from_millis));

    let opts = SolveOptions {
        url: url.to_string(),
        timeout,
        cookies: request.cookies.clone(),
        headers,
        proxy: request.proxy.clone(),
        post_data: request.post_data.clone(),
        is_post,
        screenshot: request.return_screenshot,
        disable_media: request.disable_media,
        wait_seconds: request.wait_in_seconds.unwrap_or(0),
    };
    let host = url.host_str().unwrap_or("").to_string();
    Ok((opts, host))
}

fn build_solution(result: SolveResult, request: &V1Request) -> Solution {
    Solution {
        url: result.url,
        status: result.status_code,
        response: if request.return_only_cookies {
            None
        } else {
            Some(result.html)
        },
        cookies: result.cookies,
        user_agent: result.user_agent,
        screenshot: result
            .screenshot
            .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)),
        turnstile_token: result.turnstile_token,
        rate_limited: None,
        error_code: None,
        error_category: None,
        suggested_delay_ms: None,
    }
}

fn redacted_target(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(url) => validation::redact_url(&url),
        Err(_) => raw.to_string(),
    }
}

async fn handle_session_create(
    state: &AppState,
    request: V1Request,
    started: i64,
) -> V1Response {
    let id = request
        .session
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if let Err(e) = validation::validate_session_id(&id) {
        return error_response(&e.into(), started);
    }

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let lease = match state.pool.acquire(&cancel).await {
        Ok(lease) => lease,
        Err(e) => return error_response(&e.into(), started),
    };
    match state.sessions.create(&id, lease).await {
        Ok(_) => V1Response::ok("Session created successfully.", started).with_session(id),
        Err(e) => error_response(&e.into(), started),
    }
}

async fn handle_session_list(state: &AppState, started: i64) -> V1Response {
    let sessions = state.sessions.list().await;
    V1Response::ok("Sessions listed.", started).with_sessions(sessions)
}

async fn handle_session_destroy(
    state: &AppState,
    request: V1Request,
    started: i64,
) -> V1Response {
    let Some(id) = request.session else {
        return error_response(
            &breakwater_types::RequestError::InvalidRequest(
                "session parameter is required".to_string(),
            )
            .into(),
            started,
        );
    };
    match state.sessions.destroy(&id).await {
        Ok(()) => V1Response::ok("The session has been removed.", started),
        Err(e) => error_response(&e.into(), started),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SolvePipeline;
    use crate::state::DomainStats;
    use async_trait::async_trait;
    use breakwater_browser::driver::{
        BrowserHandle, BrowserLauncher, DriverResult, LaunchOptions, PageHandle,
    };
    use breakwater_browser::{BrowserPool, SessionManager};
    use breakwater_solver::{SolverChain, SolverMetrics};
    use breakwater_types::{AppConfig, ChallengeError, Cookie, RateLimitInfo};
    use std::sync::Arc;
    use std::time::Instant;

    /// Launcher whose browsers serve one fixed response for any URL.
    struct StubLauncher {
        status: u16,
        body: &'static str,
    }

    #[async_trait]
    impl BrowserLauncher for StubLauncher {
        async fn launch(&self, _overrides: &LaunchOptions) -> DriverResult<Box<dyn BrowserHandle>> {
            Ok(Box::new(StubBrowser {
                status: self.status,
                body: self.body,
            }))
        }
    }

    struct StubBrowser {
        status: u16,
        body: &'static str,
    }

    #[async_trait]
    impl BrowserHandle for StubBrowser {
        async fn new_page(&self) -> DriverResult<Box<dyn PageHandle>> {
            Ok(Box::new(StubPage {
                status: self.status,
                body: self.body,
                url: std::sync::Mutex::new("about:blank".to_string()),
            }))
        }
        async fn pages(&self) -> DriverResult<Vec<Box<dyn PageHandle>>> {
            Ok(Vec::new())
        }
        async fn close(&self) -> DriverResult<()> {
            Ok(())
        }
    }

    struct StubPage {
        status: u16,
        body: &'static str,
        url: std::sync::Mutex<String>,
    }

    #[async_trait]
    impl PageHandle for StubPage {
        async fn navigate(&self, url: &str) -> DriverResult<u16> {
            *self.url.lock().unwrap() = url.to_string();
            Ok(self.status)
        }
        async fn content(&self) -> DriverResult<String> {
            Ok(self.body.to_string())
        }
        async fn url(&self) -> DriverResult<String> {
            Ok(self.url.lock().unwrap().clone())
        }
        async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value> {
            if script.contains("navigator.userAgent") {
                Ok(serde_json::Value::String("Mozilla/5.0 (stub)".to_string()))
            } else if script.contains("return el && el.value") {
                Ok(serde_json::Value::String(String::new()))
            } else {
                Ok(serde_json::Value::Null)
            }
        }
        async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
            Ok(vec![Cookie::new("sid", "1")])
        }
        async fn set_cookies(&self, _c: &[Cookie], _u: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn set_extra_headers(&self, _h: &[(String, String)]) -> DriverResult<()> {
            Ok(())
        }
        async fn block_media(&self) -> DriverResult<()> {
            Ok(())
        }
        async fn screenshot(&self) -> DriverResult<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn close(&self) -> DriverResult<()> {
            Ok(())
        }
    }

    async fn test_state(status: u16, body: &'static str) -> AppState {
        let config = Arc::new(AppConfig::default());
        let pool = BrowserPool::new(
            config.pool.clone(),
            Arc::new(StubLauncher { status, body }),
        )
        .await
        .unwrap();
        let metrics = Arc::new(SolverMetrics::new());
        let chain = Arc::new(SolverChain::new(&config.solver, Vec::new(), metrics.clone()));
        AppState {
            config: config.clone(),
            pool,
            sessions: SessionManager::new(config.session.clone()),
            pipeline: Arc::new(SolvePipeline::new(chain.clone())),
            chain,
            metrics,
            domains: Arc::new(DomainStats::new()),
            started_at: Instant::now(),
        }
    }

    async fn run(state: &AppState, body: &str) -> V1Response {
        command(State(state.clone()), Bytes::from(body.to_string()))
            .await
            .0
    }

    #[tokio::test]
    async fn plain_page_round_trip() {
        let state = test_state(200, "<html>ok</html>").await;
        let response = run(
            &state,
            r#"{ "cmd": "request.get", "url": "https://example.com/plain" }"#,
        )
        .await;

        assert_eq!(response.status, "ok");
        let solution = response.solution.unwrap();
        assert_eq!(solution.status, 200);
        assert_eq!(solution.response.as_deref(), Some("<html>ok</html>"));
        assert_eq!(solution.user_agent, "Mozilla/5.0 (stub)");
        assert_eq!(solution.rate_limited, None);
        state.pool.close().await;
    }

    #[tokio::test]
    async fn rate_limited_page_carries_hints() {
        let state = test_state(429, "slow down").await;
        let response = run(
            &state,
            r#"{ "cmd": "request.get", "url": "https://example.com/busy" }"#,
        )
        .await;

        assert_eq!(response.status, "ok");
        let solution = response.solution.unwrap();
        assert_eq!(solution.status, 429);
        assert_eq!(solution.rate_limited, Some(true));
        assert_eq!(solution.error_code.as_deref(), Some("HTTP_429"));
        assert_eq!(solution.error_category.as_deref(), Some("rate_limit"));
        assert_eq!(solution.suggested_delay_ms, Some(60_000));
        state.pool.close().await;
    }

    #[tokio::test]
    async fn cloudflare_1015_body_is_classified() {
        let state = test_state(200, "<html>Error code: 1015</html>").await;
        let response = run(
            &state,
            r#"{ "cmd": "request.get", "url": "https://example.com/limited" }"#,
        )
        .await;

        let solution = response.solution.unwrap();
        assert_eq!(solution.error_code.as_deref(), Some("CF_1015"));
        assert_eq!(solution.error_category.as_deref(), Some("rate_limit"));
        assert_eq!(solution.suggested_delay_ms, Some(60_000));
        state.pool.close().await;
    }

    #[tokio::test]
    async fn session_lifecycle_round_trip() {
        let state = test_state(200, "<html>ok</html>").await;

        let created = run(&state, r#"{ "cmd": "sessions.create", "session": "s1" }"#).await;
        assert_eq!(created.status, "ok");
        assert_eq!(created.session.as_deref(), Some("s1"));

        let listed = run(&state, r#"{ "cmd": "sessions.list" }"#).await;
        assert_eq!(listed.sessions, Some(vec!["s1".to_string()]));

        let solved = run(
            &state,
            r#"{ "cmd": "request.get", "url": "https://example.com/in-session", "session": "s1" }"#,
        )
        .await;
        assert_eq!(solved.status, "ok");
        assert!(solved.solution.is_some());

        let destroyed = run(&state, r#"{ "cmd": "sessions.destroy", "session": "s1" }"#).await;
        assert_eq!(destroyed.status, "ok");

        let missing = run(
            &state,
            r#"{ "cmd": "request.get", "url": "https://example.com/in-session", "session": "s1" }"#,
        )
        .await;
        assert_eq!(missing.status, "error");
        assert!(missing.message.contains("session not found"));

        state.sessions.close().await;
        state.pool.close().await;
    }

    #[tokio::test]
    async fn unknown_commands_are_rejected() {
        let state = test_state(200, "<html>ok</html>").await;
        let response = run(&state, r#"{ "cmd": "request.delete" }"#).await;
        assert_eq!(response.status, "error");
        assert!(response.message.contains("invalid command"));
        state.pool.close().await;
    }

    #[tokio::test]
    async fn request_without_url_is_rejected() {
        let state = test_state(200, "<html>ok</html>").await;
        let response = run(&state, r#"{ "cmd": "request.get" }"#).await;
        assert_eq!(response.status, "error");
        assert!(response.message.contains("url"));
        state.pool.close().await;
    }

    #[tokio::test]
    async fn malformed_bodies_get_the_compat_envelope() {
        let state = test_state(200, "<html>ok</html>").await;
        let response = run(&state, "{ not json").await;
        assert_eq!(response.status, "error");
        assert!(response.message.contains("invalid request body"));
        state.pool.close().await;
    }

    #[test]
    fn challenge_errors_carry_hint_block_in_the_envelope() {
        let info = RateLimitInfo::detected(
            "CF_1015",
            RateLimitCategory::RateLimit,
            60_000,
            "Cloudflare rate limited",
        );
        let err = ApiError::Challenge(ChallengeError::AccessDenied(info));
        let response = error_response(&err, 0);
        assert_eq!(response.status, "error");
        assert_eq!(response.rate_limited, Some(true));
        assert_eq!(response.error_code.as_deref(), Some("CF_1015"));
        assert_eq!(response.suggested_delay_ms, Some(60_000));
    }

    #[test]
    fn non_challenge_errors_skip_the_hint_block() {
        let err = ApiError::Pool(breakwater_types::PoolError::Closed);
        let response = error_response(&err, 0);
        assert_eq!(response.status, "error");
        assert_eq!(response.rate_limited, None);
    }

    #[test]
    fn return_only_cookies_strips_the_body() {
        let request: V1Request = serde_json::from_str(
            r#"{ "cmd": "request.get", "url": "https://example.com", "returnOnlyCookies": true }"#,
        )
        .unwrap();
        let result = SolveResult {
            url: "https://example.com".to_string(),
            html: "<html>secret</html>".to_string(),
            status_code: 200,
            cookies: Vec::new(),
            user_agent: "UA".to_string(),
            screenshot: None,
            turnstile_token: None,
        };
        let solution = build_solution(result, &request);
        assert!(solution.response.is_none());
    }

    #[test]
    fn target_redaction_applies_to_log_lines() {
        let line = redacted_target("https://example.com/?password=hunter2&x=1");
        assert!(!line.contains("hunter2"));
        assert!(line.contains("x=1"));
    }
}
