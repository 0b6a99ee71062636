//! Mock driver implementations shared by the pool and session tests.
#![allow(dead_code)]

use async_trait::async_trait;
use breakwater_browser::driver::{
    BrowserHandle, BrowserLauncher, DriverError, DriverResult, LaunchOptions, PageHandle,
};
use breakwater_types::{Cookie, PoolSettings};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Launcher producing in-memory fake browsers.
#[derive(Default)]
pub struct MockLauncher {
    pub launched: AtomicUsize,
    /// Launches at or past this count fail, simulating spawn errors.
    pub fail_from: Option<usize>,
    /// Newly launched browsers refuse page creation (fail health checks).
    pub unhealthy: AtomicBool,
    pub closed_browsers: Arc<AtomicUsize>,
}

impl MockLauncher {
    pub fn failing_from(n: usize) -> Self {
        Self {
            fail_from: Some(n),
            ..Self::default()
        }
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self, _overrides: &LaunchOptions) -> DriverResult<Box<dyn BrowserHandle>> {
        let n = self.launched.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_from {
            if n >= limit {
                return Err(DriverError::Launch("mock spawn failure".to_string()));
            }
        }
        Ok(Box::new(MockBrowser {
            refuse_pages: AtomicBool::new(self.unhealthy.load(Ordering::SeqCst)),
            closed: AtomicBool::new(false),
            closed_browsers: Arc::clone(&self.closed_browsers),
        }))
    }
}

pub struct MockBrowser {
    refuse_pages: AtomicBool,
    closed: AtomicBool,
    closed_browsers: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserHandle for MockBrowser {
    async fn new_page(&self) -> DriverResult<Box<dyn PageHandle>> {
        if self.refuse_pages.load(Ordering::SeqCst) {
            return Err(DriverError::PageCreation("mock page refusal".to_string()));
        }
        Ok(Box::new(MockPage::default()))
    }

    async fn pages(&self) -> DriverResult<Vec<Box<dyn PageHandle>>> {
        Ok(Vec::new())
    }

    async fn close(&self) -> DriverResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closed_browsers.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPage {
    pub last_url: Mutex<String>,
}

#[async_trait]
impl PageHandle for MockPage {
    async fn navigate(&self, url: &str) -> DriverResult<u16> {
        *self.last_url.lock().unwrap() = url.to_string();
        Ok(200)
    }

    async fn content(&self) -> DriverResult<String> {
        Ok("<html>ok</html>".to_string())
    }

    async fn url(&self) -> DriverResult<String> {
        Ok(self.last_url.lock().unwrap().clone())
    }

    async fn evaluate(&self, _script: &str) -> DriverResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
        Ok(Vec::new())
    }

    async fn set_cookies(&self, _cookies: &[Cookie], _page_url: &str) -> DriverResult<()> {
        Ok(())
    }

    async fn set_extra_headers(&self, _headers: &[(String, String)]) -> DriverResult<()> {
        Ok(())
    }

    async fn block_media(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn close(&self) -> DriverResult<()> {
        Ok(())
    }
}

/// Pool settings with intervals pushed out of the way and short waits so
/// failure paths resolve quickly.
pub fn fast_pool_settings(size: usize) -> PoolSettings {
    PoolSettings {
        size,
        wait_timeout: Duration::from_millis(250),
        max_memory_mb: u64::MAX,
        max_instance_age: Duration::from_secs(3600),
        memory_check_interval: Duration::from_secs(3600),
        age_check_interval: Duration::from_secs(3600),
        health_check_timeout: Duration::from_millis(250),
        recycle_close_timeout: Duration::from_millis(250),
        recycle_spawn_timeout: Duration::from_millis(500),
        acquire_retry_budget: 5,
    }
}
