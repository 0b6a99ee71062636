//! Cancellation-aware JS evaluation.

use breakwater_browser::PageHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) const EVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a single evaluation produced nothing.
#[derive(Debug)]
pub(crate) enum EvalError {
    /// The outer context was cancelled; callers must return promptly.
    Canceled,
    /// The page rejected or garbled the script. Strategy-level miss.
    Failed(String),
    /// The evaluation outlived its deadline. Strategy-level miss.
    TimedOut,
}

/// Evaluate `script` with a hard deadline, returning immediately when the
/// outer context is cancelled.
pub(crate) async fn eval_with_timeout(
    page: &dyn PageHandle,
    script: &str,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<serde_json::Value, EvalError> {
    if cancel.is_cancelled() {
        return Err(EvalError::Canceled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EvalError::Canceled),
        evaluated = tokio::time::timeout(deadline, page.evaluate(script)) => {
            match evaluated {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(EvalError::Failed(e.to_string())),
                Err(_) => Err(EvalError::TimedOut),
            }
        }
    }
}
