//! # Breakwater Types
//!
//! Shared types for the breakwater challenge-solving service.
//! This crate holds the data model, error taxonomy and configuration types
//! used across the browser, solver and API crates, so that the leaf crates
//! never depend on each other for plain data.

pub mod classify;
pub mod config;
pub mod errors;
pub mod solve;
pub mod turnstile;

pub use classify::{RateLimitCategory, RateLimitInfo};
pub use config::{
    AppConfig, BrowserSettings, PoolSettings, ProviderSettings, SessionSettings, SolverSettings,
};
pub use errors::{ChallengeError, PoolError, RequestError, SessionError, SolverError};
pub use solve::{Cookie, ProxyConfig, SolveOptions, SolveResult};
pub use turnstile::{ProviderStats, TurnstileRequest, TurnstileResult};
