//! Chromium driver implementation over chromiumoxide.

use crate::driver::{
    BrowserHandle, BrowserLauncher, DriverError, DriverResult, LaunchOptions, PageHandle,
};
use async_trait::async_trait;
use breakwater_types::{BrowserSettings, Cookie};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventResponseReceived, Headers, ResourceType, SetBlockedUrLsParams,
    SetExtraHttpHeadersParams, TimeSinceEpoch,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// URL patterns blocked when a request disables media loading.
const MEDIA_URL_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.css", "*.woff",
    "*.woff2", "*.ttf", "*.otf", "*.mp3", "*.mp4", "*.webm", "*.avi",
];

/// Launches isolated Chromium processes.
///
/// Each launch gets its own profile directory. Chrome enforces a
/// SingletonLock per profile, so concurrent instances must never share one.
pub struct ChromiumLauncher {
    settings: BrowserSettings,
    /// Pool-wide proxy applied to every launch without a per-launch override.
    base_proxy: Option<String>,
}

impl ChromiumLauncher {
    pub fn new(settings: BrowserSettings, base_proxy: Option<String>) -> Self {
        Self {
            settings,
            base_proxy,
        }
    }

    fn build_config(
        &self,
        overrides: &LaunchOptions,
        user_data_dir: &std::path::Path,
    ) -> DriverResult<BrowserConfig> {
        let mut builder = BrowserConfig::builder();

        if !self.settings.headless {
            builder = builder.with_head();
        }

        builder = builder
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-backgrounding-occluded-windows")
            .arg("--disable-renderer-backgrounding")
            .arg("--memory-pressure-off")
            .arg("--window-size=1920,1080");

        if self.settings.ignore_cert_errors {
            builder = builder.arg("--ignore-certificate-errors");
        }

        if let Some(proxy) = overrides.proxy_url.as_ref().or(self.base_proxy.as_ref()) {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        let mut config = builder.build().map_err(DriverError::Launch)?;
        config.user_data_dir = Some(user_data_dir.to_path_buf());
        Ok(config)
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, overrides: &LaunchOptions) -> DriverResult<Box<dyn BrowserHandle>> {
        let temp_dir =
            TempDir::new().map_err(|e| DriverError::Launch(format!("temp profile: {}", e)))?;
        let config = self.build_config(overrides, temp_dir.path())?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        // The handler stream must be pumped for the browser connection to
        // make progress at all.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser event error");
                }
            }
        });

        Ok(Box::new(ChromiumBrowser {
            browser: Mutex::new(browser),
            handler_task,
            _temp_dir: temp_dir,
        }))
    }
}

/// One Chromium process plus the resources pinned to its lifetime.
pub struct ChromiumBrowser {
    browser: Mutex<Browser>,
    handler_task: tokio::task::JoinHandle<()>,
    // Keeps the profile directory alive until the process is gone.
    _temp_dir: TempDir,
}

#[async_trait]
impl BrowserHandle for ChromiumBrowser {
    async fn new_page(&self) -> DriverResult<Box<dyn PageHandle>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::PageCreation(e.to_string()))?;
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn pages(&self) -> DriverResult<Vec<Box<dyn PageHandle>>> {
        let pages = self
            .browser
            .lock()
            .await
            .pages()
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?;
        Ok(pages
            .into_iter()
            .map(|page| Box::new(ChromiumPage { page }) as Box<dyn PageHandle>)
            .collect())
    }

    async fn close(&self) -> DriverResult<()> {
        let result = self
            .browser
            .lock()
            .await
            .close()
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Io(e.to_string()));
        self.handler_task.abort();
        result
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

/// One Chromium tab.
pub struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl PageHandle for ChromiumPage {
    async fn navigate(&self, url: &str) -> DriverResult<u16> {
        // Subscribe before the navigation starts so the main-document
        // response is not missed.
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| DriverError::Navigation(e.to_string()))?;

        self.page
            .goto(url)
            .await
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        let _ = self.page.wait_for_navigation().await;

        // The document response usually arrives before the load event; give
        // stragglers a short grace window and keep the last one seen.
        let mut status = 0u16;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(250), responses.next()).await
        {
            if event.r#type == ResourceType::Document {
                status = event.response.status as u16;
            }
        }
        Ok(status)
    }

    async fn post(&self, url: &str, post_data: &str) -> DriverResult<u16> {
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| DriverError::Navigation(e.to_string()))?;

        self.page
            .goto("about:blank")
            .await
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        let script = crate::driver::build_form_post_script(url, post_data);
        self.page
            .evaluate(script.as_str())
            .await
            .map_err(|e| DriverError::Evaluation(e.to_string()))?;
        let _ = self.page.wait_for_navigation().await;

        let mut status = 0u16;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(250), responses.next()).await
        {
            if event.r#type == ResourceType::Document {
                status = event.response.status as u16;
            }
        }
        Ok(status)
    }

    async fn content(&self) -> DriverResult<String> {
        self.page
            .content()
            .await
            .map_err(|e| DriverError::Io(e.to_string()))
    }

    async fn url(&self) -> DriverResult<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn evaluate(&self, script: &str) -> DriverResult<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::Evaluation(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn install_init_script(&self, script: &str) -> DriverResult<()> {
        self.page
            .evaluate_on_new_document(script)
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Evaluation(e.to_string()))
    }

    async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| DriverError::Cookies(e.to_string()))?;

        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: Some(c.domain),
                path: Some(c.path),
                expires: (c.expires >= 0.0).then_some(c.expires),
                http_only: Some(c.http_only),
                secure: Some(c.secure),
                same_site: c.same_site.map(|s| format!("{:?}", s)),
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[Cookie], page_url: &str) -> DriverResult<()> {
        if cookies.is_empty() {
            return Ok(());
        }

        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let mut builder = CookieParam::builder()
                .name(&cookie.name)
                .value(&cookie.value);
            match &cookie.domain {
                Some(domain) => builder = builder.domain(domain),
                None => builder = builder.url(page_url),
            }
            if let Some(path) = &cookie.path {
                builder = builder.path(path);
            }
            if let Some(expires) = cookie.expires {
                builder = builder.expires(TimeSinceEpoch::new(expires));
            }
            if let Some(secure) = cookie.secure {
                builder = builder.secure(secure);
            }
            if let Some(http_only) = cookie.http_only {
                builder = builder.http_only(http_only);
            }
            params.push(builder.build().map_err(DriverError::Cookies)?);
        }

        self.page
            .set_cookies(params)
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Cookies(e.to_string()))
    }

    async fn set_extra_headers(&self, headers: &[(String, String)]) -> DriverResult<()> {
        let mut map = serde_json::Map::new();
        for (name, value) in headers {
            map.insert(name.clone(), serde_json::Value::String(value.clone()));
        }
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(map),
            )))
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Io(e.to_string()))
    }

    async fn block_media(&self) -> DriverResult<()> {
        let patterns: Vec<String> = MEDIA_URL_PATTERNS.iter().map(|p| p.to_string()).collect();
        self.page
            .execute(SetBlockedUrLsParams::new(patterns))
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Io(e.to_string()))
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        self.page
            .screenshot(chromiumoxide::page::ScreenshotParams::default())
            .await
            .map_err(|e| DriverError::Screenshot(e.to_string()))
    }

    async fn close(&self) -> DriverResult<()> {
        if let Err(e) = self.page.clone().close().await {
            warn!(error = %e, "failed to close page");
            return Err(DriverError::Io(e.to_string()));
        }
        Ok(())
    }
}
