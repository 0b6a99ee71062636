//! A single pooled browser process.

use crate::driver::{BrowserHandle, DriverError, DriverResult, PageHandle};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Handle to one underlying browser process.
///
/// The pool is the sole owner for the instance's entire lifetime; at most
/// one caller holds it between checkout and return, and only the pool's
/// recycle path closes it.
pub struct BrowserInstance {
    id: Uuid,
    handle: Box<dyn BrowserHandle>,
    created_at: Instant,
}

impl BrowserInstance {
    pub(crate) fn new(handle: Box<dyn BrowserHandle>) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub async fn new_page(&self) -> DriverResult<Box<dyn PageHandle>> {
        self.handle.new_page().await
    }

    /// Probe the process: create a blank page, navigate it, close it.
    /// The whole probe is bounded by `deadline`.
    pub async fn health_check(&self, deadline: Duration) -> bool {
        let probe = async {
            let page = self.handle.new_page().await?;
            page.navigate("about:blank").await?;
            page.close().await?;
            Ok::<_, DriverError>(())
        };
        match tokio::time::timeout(deadline, probe).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(browser_id = %self.id, error = %e, "health check failed");
                false
            }
            Err(_) => {
                debug!(browser_id = %self.id, "health check timed out");
                false
            }
        }
    }

    /// Blank and close every open page before the instance goes back to the
    /// ready queue. Failures are logged, never surfaced.
    pub(crate) async fn scrub_pages(&self) {
        match self.handle.pages().await {
            Ok(pages) => {
                for page in pages {
                    if let Err(e) = page.navigate("about:blank").await {
                        debug!(browser_id = %self.id, error = %e, "failed to blank page");
                    }
                    if let Err(e) = page.close().await {
                        debug!(browser_id = %self.id, error = %e, "failed to close page");
                    }
                }
            }
            Err(e) => debug!(browser_id = %self.id, error = %e, "failed to enumerate pages"),
        }
    }

    pub(crate) async fn close(&self) -> DriverResult<()> {
        self.handle.close().await
    }
}

impl std::fmt::Debug for BrowserInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserInstance")
            .field("id", &self.id)
            .field("age", &self.age())
            .finish()
    }
}
