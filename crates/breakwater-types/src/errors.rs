//! Error taxonomy for the breakwater subsystems.
//!
//! Each subsystem carries its own error enum; the API crate folds them into
//! wire responses. `error_type()` returns the stable machine-readable kind
//! string used in response bodies and logs.

use crate::classify::RateLimitInfo;
use std::time::Duration;
use thiserror::Error;

/// Browser pool failures.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool has been closed; no further checkouts are possible.
    #[error("browser pool is closed")]
    Closed,

    /// No browser became available within the configured wait timeout.
    #[error("timed out waiting for an available browser after {0:?}")]
    Timeout(Duration),

    /// Every retry candidate failed its health check.
    #[error("no healthy browser available after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// A checked-out browser failed its health probe.
    #[error("browser failed health check: {0}")]
    Unhealthy(String),

    /// The underlying browser process died or could not be spawned.
    #[error("browser crashed: {0}")]
    Crashed(String),

    /// The caller's cancellation handle fired while waiting.
    #[error("pool acquire was canceled")]
    Canceled,
}

impl PoolError {
    pub fn error_type(&self) -> &'static str {
        match self {
            PoolError::Closed => "pool_closed",
            PoolError::Timeout(_) => "pool_timeout",
            PoolError::Exhausted { .. } => "pool_exhausted",
            PoolError::Unhealthy(_) => "browser_unhealthy",
            PoolError::Crashed(_) => "browser_crashed",
            PoolError::Canceled => "canceled",
        }
    }
}

/// Session manager failures.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found: {id}")]
    NotFound { id: String },

    #[error("session already exists: {id}")]
    AlreadyExists { id: String },

    #[error("session expired: {id}")]
    Expired { id: String },

    #[error("session limit reached ({max})")]
    TooManySessions { max: usize },

    /// The session's browser could not produce a usable page.
    #[error("session page unavailable: {0}")]
    PageUnavailable(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl SessionError {
    pub fn error_type(&self) -> &'static str {
        match self {
            SessionError::NotFound { .. } => "session_not_found",
            SessionError::AlreadyExists { .. } => "session_already_exists",
            SessionError::Expired { .. } => "session_expired",
            SessionError::TooManySessions { .. } => "too_many_sessions",
            SessionError::PageUnavailable(_) => "session_page_unavailable",
            SessionError::Pool(e) => e.error_type(),
        }
    }
}

/// Failures of the challenge pipeline, surfaced to clients.
#[derive(Error, Debug)]
pub enum ChallengeError {
    /// The origin refuses this client; retrying quickly will not help.
    /// Carries the classifier hint block so clients can steer retries.
    #[error("access denied by origin")]
    AccessDenied(RateLimitInfo),

    #[error("challenge was not solved within {0:?}")]
    Timeout(Duration),

    #[error("challenge could not be solved: {0}")]
    Unsolvable(String),

    #[error("turnstile handling failed: {0}")]
    TurnstileFailed(String),

    #[error("solve was canceled")]
    Canceled,
}

impl ChallengeError {
    pub fn error_type(&self) -> &'static str {
        match self {
            ChallengeError::AccessDenied(_) => "access_denied",
            ChallengeError::Timeout(_) => "challenge_timeout",
            ChallengeError::Unsolvable(_) => "challenge_unsolvable",
            ChallengeError::TurnstileFailed(_) => "turnstile_failed",
            ChallengeError::Canceled => "canceled",
        }
    }

    /// The rate-limit hint block attached to this error, if any.
    pub fn rate_limit_info(&self) -> Option<&RateLimitInfo> {
        match self {
            ChallengeError::AccessDenied(info) => Some(info),
            _ => None,
        }
    }
}

/// Request validation failures.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("url parameter is required")]
    UrlRequired,

    #[error("postData parameter is required for request.post")]
    PostDataRequired,
}

impl RequestError {
    pub fn error_type(&self) -> &'static str {
        match self {
            RequestError::InvalidRequest(_) => "invalid_request",
            RequestError::InvalidUrl(_) => "invalid_url",
            RequestError::InvalidCommand(_) => "invalid_command",
            RequestError::UrlRequired => "url_required",
            RequestError::PostDataRequired => "post_data_required",
        }
    }
}

/// External captcha-solver failures.
#[derive(Error, Debug)]
pub enum SolverError {
    /// The provider did not produce a token before the polling deadline.
    #[error("{provider}: no solution after {deadline:?}")]
    Timeout { provider: String, deadline: Duration },

    /// The provider rejected the task. `retryable` distinguishes transient
    /// capacity errors from sitekey/credential errors that will repeat.
    #[error("{provider} rejected the task ({code})")]
    Rejected {
        provider: String,
        code: String,
        retryable: bool,
    },

    #[error("{provider}: account balance exhausted")]
    InsufficientBalance { provider: String },

    #[error("no turnstile sitekey found on page")]
    SitekeyNotFound,

    #[error("token injection failed: {0}")]
    TokenInjectionFailed(String),

    #[error("no captcha providers are configured")]
    NoProvidersConfigured,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("solver call was canceled")]
    Canceled,

    /// Transport or decoding failure talking to the provider.
    #[error("{provider}: http error: {message}")]
    Http { provider: String, message: String },
}

impl SolverError {
    pub fn error_type(&self) -> &'static str {
        match self {
            SolverError::Timeout { .. } => "solver_timeout",
            SolverError::Rejected { .. } => "solver_rejected",
            SolverError::InsufficientBalance { .. } => "insufficient_balance",
            SolverError::SitekeyNotFound => "sitekey_not_found",
            SolverError::TokenInjectionFailed(_) => "token_injection_failed",
            SolverError::NoProvidersConfigured => "no_providers_configured",
            SolverError::InvalidRequest(_) => "invalid_request",
            SolverError::Canceled => "canceled",
            SolverError::Http { .. } => "solver_http_error",
        }
    }

    /// Whether retrying the same task against another provider can help.
    pub fn is_retryable(&self) -> bool {
        match self {
            SolverError::Timeout { .. } | SolverError::Http { .. } => true,
            SolverError::Rejected { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_strings_are_stable() {
        assert_eq!(PoolError::Closed.error_type(), "pool_closed");
        assert_eq!(
            PoolError::Timeout(Duration::from_secs(1)).error_type(),
            "pool_timeout"
        );
        assert_eq!(
            SessionError::NotFound { id: "x".into() }.error_type(),
            "session_not_found"
        );
        assert_eq!(SolverError::SitekeyNotFound.error_type(), "sitekey_not_found");
        assert_eq!(
            ChallengeError::Unsolvable("n/a".into()).error_type(),
            "challenge_unsolvable"
        );
    }

    #[test]
    fn rejected_retryability_is_preserved() {
        let transient = SolverError::Rejected {
            provider: "2captcha".into(),
            code: "ERROR_NO_SLOT_AVAILABLE".into(),
            retryable: true,
        };
        let fatal = SolverError::Rejected {
            provider: "2captcha".into(),
            code: "ERROR_WRONG_SITEKEY".into(),
            retryable: false,
        };
        assert!(transient.is_retryable());
        assert!(!fatal.is_retryable());
    }
}
