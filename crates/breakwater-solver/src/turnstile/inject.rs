//! Token injection: four strategies tried in order, first success wins.

use super::{eval_with_timeout, EvalError, EVAL_TIMEOUT};
use breakwater_browser::PageHandle;
use breakwater_types::SolverError;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Strategy 1: write into the hidden response inputs and fire the events
/// frameworks listen for.
const INJECT_INPUTS_JS: &str = r#"(token) => {
    const selectors = [
        'input[name="cf-turnstile-response"]',
        'textarea[name="cf-turnstile-response"]',
        'input[name="g-recaptcha-response"]',
        'textarea[name="g-recaptcha-response"]',
        'input[name="h-captcha-response"]',
        'textarea[name="h-captcha-response"]',
    ];
    let hit = false;
    for (const selector of selectors) {
        for (const el of document.querySelectorAll(selector)) {
            el.value = token;
            el.dispatchEvent(new Event('input', { bubbles: true }));
            el.dispatchEvent(new Event('change', { bubbles: true }));
            hit = true;
        }
    }
    return hit;
}"#;

/// Strategy 2: call whatever the widget's `data-callback` names.
const INJECT_DATA_CALLBACK_JS: &str = r#"(token) => {
    let hit = false;
    for (const el of document.querySelectorAll('[data-callback]')) {
        const name = el.getAttribute('data-callback');
        if (name && typeof window[name] === 'function') {
            try { window[name](token); hit = true; } catch (e) {}
        }
    }
    return hit;
}"#;

/// Strategy 3: feed the turnstile runtime object directly.
const INJECT_TURNSTILE_OBJECT_JS: &str = r#"(token) => {
    if (typeof window.turnstile === 'undefined') {
        return false;
    }
    let hit = false;
    for (const widget of document.querySelectorAll('.cf-turnstile')) {
        widget.setAttribute('data-turnstile-response', token);
        hit = true;
    }
    if (window.turnstile.widgets) {
        for (const id of Object.keys(window.turnstile.widgets)) {
            try { window.turnstile.widgets[id].response = token; hit = true; } catch (e) {}
        }
    }
    document.dispatchEvent(new CustomEvent('turnstile-success', { detail: { token: token } }));
    return hit;
}"#;

/// Strategy 4: commonly-used global callback names, then forms whose
/// onsubmit mentions turnstile.
const INJECT_KNOWN_CALLBACKS_JS: &str = r#"(token) => {
    const callbacks = [
        'turnstileCallback', 'onTurnstileSuccess', 'handleTurnstile', 'cfCallback',
        'captchaCallback', 'onCaptchaSuccess', 'grecaptchaCallback', 'hcaptchaCallback',
    ];
    for (const name of callbacks) {
        if (typeof window[name] === 'function') {
            try { window[name](token); return true; } catch (e) {}
        }
    }
    for (const form of document.querySelectorAll('form')) {
        const submit = form.getAttribute('onsubmit') || '';
        if (submit.toLowerCase().includes('turnstile')) {
            const input = form.querySelector(
                'input[name="cf-turnstile-response"], textarea[name="cf-turnstile-response"]');
            if (input) { input.value = token; return true; }
        }
    }
    return false;
}"#;

const STRATEGIES: [&str; 4] = [
    INJECT_INPUTS_JS,
    INJECT_DATA_CALLBACK_JS,
    INJECT_TURNSTILE_OBJECT_JS,
    INJECT_KNOWN_CALLBACKS_JS,
];

/// Present a solved token to the page. Injecting the same token twice is
/// harmless; every strategy is idempotent.
pub async fn inject_token(
    page: &dyn PageHandle,
    token: &str,
    cancel: &CancellationToken,
) -> Result<(), SolverError> {
    if token.is_empty() {
        return Err(SolverError::InvalidRequest(
            "refusing to inject an empty token".to_string(),
        ));
    }
    if cancel.is_cancelled() {
        return Err(SolverError::Canceled);
    }

    // The token is attacker-influenced data as far as the page is
    // concerned; JSON encoding is what keeps it out of script position.
    let encoded = serde_json::to_string(token)
        .map_err(|e| SolverError::InvalidRequest(e.to_string()))?;

    for (i, strategy) in STRATEGIES.iter().enumerate() {
        let script = format!("({})({})", strategy, encoded);
        match eval_with_timeout(page, &script, EVAL_TIMEOUT, cancel).await {
            Ok(Value::Bool(true)) => {
                debug!(strategy = i + 1, "token injected");
                return Ok(());
            }
            Ok(_) => {}
            Err(EvalError::Canceled) => return Err(SolverError::Canceled),
            Err(EvalError::Failed(e)) => {
                debug!(strategy = i + 1, error = %e, "injection strategy failed");
            }
            Err(EvalError::TimedOut) => {
                debug!(strategy = i + 1, "injection strategy timed out");
            }
        }
    }
    Err(SolverError::TokenInjectionFailed(
        "no injection strategy succeeded".to_string(),
    ))
}
