//! In-page turnstile plumbing: sitekey extraction and token injection.
//!
//! The payloads are hermetic JS function expressions compiled as string
//! constants. Anything client-influenced (the token) is JSON-encoded before
//! it is spliced into a call expression, never concatenated raw.

mod eval;
mod extract;
mod inject;

pub use extract::{extract_sitekey, SitekeyInfo};
pub use inject::inject_token;

pub(crate) use eval::{eval_with_timeout, EvalError, EVAL_TIMEOUT};
