//! External captcha-solver provider clients.
//!
//! Both providers speak the same createTask / getTaskResult / getBalance
//! protocol and differ only in JSON shape and error-code vocabulary.

pub mod cap_solver;
pub mod two_captcha;

pub use cap_solver::CapSolverProvider;
pub use two_captcha::TwoCaptchaProvider;

use async_trait::async_trait;
use breakwater_types::{SolverError, TurnstileRequest, TurnstileResult};
use tokio_util::sync::CancellationToken;

/// A third-party service that turns `(sitekey, page_url)` into a signed
/// turnstile token.
#[async_trait]
pub trait CaptchaProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether credentials are present. Unconfigured providers are skipped
    /// by the chain.
    fn is_configured(&self) -> bool;

    async fn solve_turnstile(
        &self,
        request: &TurnstileRequest,
        cancel: &CancellationToken,
    ) -> Result<TurnstileResult, SolverError>;

    /// Remaining account balance in USD.
    async fn balance(&self) -> Result<f64, SolverError>;
}

/// Map a provider error code onto the shared taxonomy.
pub(crate) fn translate_error_code(provider: &str, code: &str) -> SolverError {
    match code {
        "ERROR_ZERO_BALANCE" => SolverError::InsufficientBalance {
            provider: provider.to_string(),
        },
        // Transient capacity problems: worth handing to the next provider
        // and retrying later.
        "ERROR_NO_SLOT_AVAILABLE" | "ERROR_NO_AVAILABLE_WORKERS" | "ERROR_CAPTCHA_UNSOLVABLE" => {
            SolverError::Rejected {
                provider: provider.to_string(),
                code: code.to_string(),
                retryable: true,
            }
        }
        // The sitekey itself is bad; every retry with it will fail.
        "ERROR_WRONG_SITEKEY" | "ERROR_WRONG_GOOGLEKEY" | "ERROR_INVALID_TASK_DATA"
        | "ERROR_WRONG_WEBSITEKEY" => SolverError::Rejected {
            provider: provider.to_string(),
            code: code.to_string(),
            retryable: false,
        },
        // Credential problems are fatal until the operator fixes config.
        "ERROR_KEY_DOES_NOT_EXIST" | "ERROR_INVALID_CLIENTKEY" | "ERROR_KEY_DENIED"
        | "ERROR_WRONG_USER_KEY" => SolverError::Rejected {
            provider: provider.to_string(),
            code: code.to_string(),
            retryable: false,
        },
        other => SolverError::Rejected {
            provider: provider.to_string(),
            code: other.to_string(),
            retryable: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_balance_maps_to_insufficient_balance() {
        assert!(matches!(
            translate_error_code("2captcha", "ERROR_ZERO_BALANCE"),
            SolverError::InsufficientBalance { .. }
        ));
    }

    #[test]
    fn capacity_errors_are_retryable() {
        for code in ["ERROR_NO_SLOT_AVAILABLE", "ERROR_NO_AVAILABLE_WORKERS"] {
            assert!(matches!(
                translate_error_code("2captcha", code),
                SolverError::Rejected {
                    retryable: true,
                    ..
                }
            ));
        }
    }

    #[test]
    fn sitekey_and_credential_errors_are_fatal() {
        for code in [
            "ERROR_WRONG_SITEKEY",
            "ERROR_WRONG_WEBSITEKEY",
            "ERROR_KEY_DOES_NOT_EXIST",
            "ERROR_INVALID_CLIENTKEY",
        ] {
            assert!(matches!(
                translate_error_code("capsolver", code),
                SolverError::Rejected {
                    retryable: false,
                    ..
                }
            ));
        }
    }

    #[test]
    fn unknown_codes_map_to_generic_rejected() {
        match translate_error_code("capsolver", "ERROR_SOMETHING_NEW") {
            SolverError::Rejected {
                code, retryable, ..
            } => {
                assert_eq!(code, "ERROR_SOMETHING_NEW");
                assert!(!retryable);
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
