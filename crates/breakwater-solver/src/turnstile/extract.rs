//! Sitekey discovery: three strategies tried in order, first hit wins.

use super::{eval_with_timeout, EvalError, EVAL_TIMEOUT};
use breakwater_browser::PageHandle;
use breakwater_types::SolverError;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Sitekey plus the optional widget attributes providers can use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitekeyInfo {
    pub site_key: String,
    pub action: Option<String>,
    pub cdata: Option<String>,
}

/// Strategy 1: walk known widget selectors and read `data-sitekey` off the
/// first element carrying a plausible value. Also picks up the widget's
/// action/cdata attributes while it is there.
const SITEKEY_FROM_DOM_JS: &str = r#"(() => {
    const selectors = [
        '.cf-turnstile[data-sitekey]',
        '[data-sitekey]',
        'div[data-sitekey]',
        '#turnstile-wrapper [data-sitekey]',
        '.turnstile-widget[data-sitekey]',
    ];
    for (const selector of selectors) {
        for (const el of document.querySelectorAll(selector)) {
            const key = el.getAttribute('data-sitekey');
            if (key && key.length > 10) {
                return {
                    sitekey: key,
                    action: el.getAttribute('data-action'),
                    cdata: el.getAttribute('data-cdata'),
                };
            }
        }
    }
    return null;
})()"#;

/// Strategy 2: scan inline script text for a sitekey assignment.
const SITEKEY_FROM_SCRIPTS_JS: &str = r#"(() => {
    const re = /sitekey['":\s]+['"]([0-9a-zA-Z_-]+)['"]/;
    for (const script of document.querySelectorAll('script')) {
        const match = re.exec(script.textContent || '');
        if (match && match[1]) {
            return match[1];
        }
    }
    return null;
})()"#;

/// Strategy 3: pull the sitekey out of challenge iframe URLs.
const SITEKEY_FROM_IFRAMES_JS: &str = r#"(() => {
    for (const frame of document.querySelectorAll('iframe')) {
        const src = frame.getAttribute('src') || '';
        if (!(src.includes('challenges.cloudflare.com')
            || src.includes('turnstile')
            || src.includes('cf-turnstile'))) {
            continue;
        }
        const pathMatch = /\/sitekey\/([0-9a-zA-Z_-]+)/.exec(src);
        if (pathMatch) {
            return pathMatch[1];
        }
        const queryMatch = /[?&]sitekey=([0-9a-zA-Z_-]+)/.exec(src);
        if (queryMatch) {
            return queryMatch[1];
        }
    }
    return null;
})()"#;

fn from_value(value: Value) -> Option<SitekeyInfo> {
    match value {
        Value::String(s) if !s.is_empty() => Some(SitekeyInfo {
            site_key: s,
            action: None,
            cdata: None,
        }),
        Value::Object(map) => {
            let site_key = map.get("sitekey")?.as_str()?.to_string();
            if site_key.is_empty() {
                return None;
            }
            let attr = |name: &str| {
                map.get(name)
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            Some(SitekeyInfo {
                site_key,
                action: attr("action"),
                cdata: attr("cdata"),
            })
        }
        _ => None,
    }
}

/// Find the turnstile sitekey on the current page.
pub async fn extract_sitekey(
    page: &dyn PageHandle,
    cancel: &CancellationToken,
) -> Result<SitekeyInfo, SolverError> {
    let strategies = [
        SITEKEY_FROM_DOM_JS,
        SITEKEY_FROM_SCRIPTS_JS,
        SITEKEY_FROM_IFRAMES_JS,
    ];
    for (i, script) in strategies.iter().enumerate() {
        match eval_with_timeout(page, script, EVAL_TIMEOUT, cancel).await {
            Ok(value) => {
                if let Some(info) = from_value(value) {
                    debug!(strategy = i + 1, sitekey = %info.site_key, "sitekey found");
                    return Ok(info);
                }
            }
            Err(EvalError::Canceled) => return Err(SolverError::Canceled),
            Err(EvalError::Failed(e)) => {
                debug!(strategy = i + 1, error = %e, "sitekey strategy failed");
            }
            Err(EvalError::TimedOut) => {
                debug!(strategy = i + 1, "sitekey strategy timed out");
            }
        }
    }
    Err(SolverError::SitekeyNotFound)
}
