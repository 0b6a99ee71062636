//! Driver seam over the underlying CDP library.
//!
//! These traits are the only surface the pool, sessions and solve pipeline
//! touch. The concrete Chromium implementation lives in [`crate::chromium`];
//! tests substitute mock handles.

use async_trait::async_trait;
use breakwater_types::Cookie;
use thiserror::Error;

pub type DriverResult<T> = Result<T, DriverError>;

/// Failures at the browser wire level.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("page creation failed: {0}")]
    PageCreation(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("cookie operation failed: {0}")]
    Cookies(String),

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("browser io error: {0}")]
    Io(String),
}

/// Per-launch overrides on top of the launcher's base settings.
#[derive(Clone, Debug, Default)]
pub struct LaunchOptions {
    /// Proxy bound to this browser process for its whole lifetime.
    pub proxy_url: Option<String>,
}

/// One open page/tab.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigate and wait for the load to settle. Returns the main-document
    /// HTTP status when the driver observed it, 0 otherwise.
    async fn navigate(&self, url: &str) -> DriverResult<u16>;

    /// Issue a POST by building and submitting a form from a blank page.
    /// The CDP surface used here has no request interception, so this is
    /// how a POST navigation is realised.
    async fn post(&self, url: &str, post_data: &str) -> DriverResult<u16> {
        self.navigate("about:blank").await?;
        self.evaluate(&build_form_post_script(url, post_data))
            .await?;
        Ok(0)
    }

    async fn content(&self) -> DriverResult<String>;

    async fn url(&self) -> DriverResult<String>;

    /// Evaluate a JS expression; `null` when the expression yields nothing
    /// serialisable.
    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value>;

    /// Register a script to run before any origin JS on every navigation.
    /// Drivers without the capability treat this as a no-op.
    async fn install_init_script(&self, _script: &str) -> DriverResult<()> {
        Ok(())
    }

    async fn cookies(&self) -> DriverResult<Vec<Cookie>>;

    /// Install cookies before navigation. `page_url` scopes cookies that
    /// carry no explicit domain.
    async fn set_cookies(&self, cookies: &[Cookie], page_url: &str) -> DriverResult<()>;

    /// Attach extra headers to every request this page issues.
    async fn set_extra_headers(&self, headers: &[(String, String)]) -> DriverResult<()>;

    /// Stop the page from fetching images, styles, fonts and media.
    async fn block_media(&self) -> DriverResult<()>;

    async fn screenshot(&self) -> DriverResult<Vec<u8>>;

    async fn close(&self) -> DriverResult<()>;
}

/// One browser process.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    async fn new_page(&self) -> DriverResult<Box<dyn PageHandle>>;

    async fn pages(&self) -> DriverResult<Vec<Box<dyn PageHandle>>>;

    async fn close(&self) -> DriverResult<()>;
}

/// Spawns browser processes. The pool owns one launcher and calls it for the
/// initial fill, for recycling, and for dedicated per-request instances.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, overrides: &LaunchOptions) -> DriverResult<Box<dyn BrowserHandle>>;
}

/// Build the hermetic form-submit payload realising a POST navigation.
/// `post_data` is urlencoded form data; both arguments are JSON-encoded
/// before splicing so neither can escape into script position.
pub fn build_form_post_script(url: &str, post_data: &str) -> String {
    const FORM_POST_JS: &str = r#"((url, body) => {
    const form = document.createElement('form');
    form.method = 'POST';
    form.action = url;
    form.enctype = 'application/x-www-form-urlencoded';
    for (const pair of body.split('&')) {
        if (!pair) { continue; }
        const eq = pair.indexOf('=');
        const name = eq >= 0 ? pair.slice(0, eq) : pair;
        const value = eq >= 0 ? pair.slice(eq + 1) : '';
        const input = document.createElement('input');
        input.type = 'hidden';
        input.name = decodeURIComponent(name.replace(/\+/g, ' '));
        input.value = decodeURIComponent(value.replace(/\+/g, ' '));
        form.appendChild(input);
    }
    document.body.appendChild(form);
    form.submit();
    return true;
})"#;
    format!(
        "({})({}, {})",
        FORM_POST_JS,
        serde_json::to_string(url).expect("url encodes to JSON"),
        serde_json::to_string(post_data).expect("post data encodes to JSON"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_post_script_json_encodes_its_arguments() {
        let script = build_form_post_script(
            "https://example.com/submit",
            "a=1&b=hello+world\"</script>",
        );
        assert!(script.contains(r#""https://example.com/submit""#));
        // The quote must arrive escaped, not raw.
        assert!(script.contains(r#"hello+world\"<"#));
    }
}
