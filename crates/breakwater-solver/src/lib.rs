//! # Breakwater Solver
//!
//! Everything that recognises and defeats anti-bot pushback: the response
//! classifier, the external captcha-provider clients, the ordered solver
//! chain with its metrics, and the in-page turnstile sitekey extractor and
//! token injector.

pub mod chain;
pub mod classify;
pub mod metrics;
pub mod providers;
pub mod turnstile;

pub use chain::{ChainSolve, SolverChain};
pub use classify::classify;
pub use metrics::SolverMetrics;
pub use providers::{CaptchaProvider, CapSolverProvider, TwoCaptchaProvider};
pub use turnstile::{extract_sitekey, inject_token, SitekeyInfo};
