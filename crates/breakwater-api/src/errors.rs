//! API-level error folding.
//!
//! Every subsystem error lands here before it is rendered into a wire
//! response. Command failures are reported as HTTP 200 with `status=error`
//! for compatibility with existing clients; only routing-level 404/405 use
//! plain HTTP semantics.

use breakwater_browser::DriverError;
use breakwater_types::{
    ChallengeError, PoolError, RateLimitInfo, RequestError, SessionError, SolverError,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error("browser error: {0}")]
    Browser(String),
}

impl ApiError {
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Request(e) => e.error_type(),
            ApiError::Challenge(e) => e.error_type(),
            ApiError::Pool(e) => e.error_type(),
            ApiError::Session(e) => e.error_type(),
            ApiError::Solver(e) => e.error_type(),
            ApiError::Browser(_) => "browser_error",
        }
    }

    /// Retry hints attached to challenge-class failures.
    pub fn rate_limit_info(&self) -> Option<&RateLimitInfo> {
        match self {
            ApiError::Challenge(e) => e.rate_limit_info(),
            _ => None,
        }
    }
}

impl From<DriverError> for ApiError {
    fn from(err: DriverError) -> Self {
        ApiError::Browser(err.to_string())
    }
}
