//! Named, TTL-bound bindings of a pool browser to a client identifier.

use crate::driver::PageHandle;
use crate::pool::BrowserLease;
use breakwater_types::{SessionError, SessionSettings};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How many sessions the cleanup loop disposes of at once.
const DISPOSE_CONCURRENCY: usize = 4;

/// One live session. The inner mutex serialises page access: two requests
/// against the same session never drive the page in parallel.
pub struct Session {
    id: String,
    created_at: Instant,
    /// Updated on every lookup, under the session's own lock so readers
    /// never contend with the manager's map locks.
    last_used: std::sync::Mutex<Instant>,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    lease: Option<BrowserLease>,
    page: Option<Box<dyn PageHandle>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

impl Session {
    fn new(id: String, lease: BrowserLease, page: Box<dyn PageHandle>) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used: std::sync::Mutex::new(now),
            inner: Mutex::new(SessionInner {
                lease: Some(lease),
                page: Some(page),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_used
            .lock()
            .expect("session clock lock poisoned")
            .elapsed()
    }

    fn touch(&self) {
        *self.last_used.lock().expect("session clock lock poisoned") = Instant::now();
    }

    /// Take exclusive hold of the session's page for one request. The guard
    /// keeps other requests against the same session waiting until dropped.
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            inner: self.inner.lock().await,
        }
    }

    /// The browser instance id backing this session.
    pub async fn browser_id(&self) -> Option<uuid::Uuid> {
        let inner = self.inner.lock().await;
        inner.lease.as_ref().map(|l| l.browser_id())
    }

    async fn dispose(&self) {
        let (lease, page) = {
            let mut inner = self.inner.lock().await;
            (inner.lease.take(), inner.page.take())
        };
        if let Some(page) = page {
            if let Err(e) = page.close().await {
                debug!(session_id = %self.id, error = %e, "failed to close session page");
            }
        }
        if let Some(lease) = lease {
            lease.release().await;
        }
    }
}

/// Exclusive access to a session's browser and page.
pub struct SessionGuard<'a> {
    inner: tokio::sync::MutexGuard<'a, SessionInner>,
}

impl SessionGuard<'_> {
    pub fn page(&self) -> Result<&dyn PageHandle, SessionError> {
        self.inner
            .page
            .as_deref()
            .ok_or_else(|| SessionError::PageUnavailable("session already disposed".to_string()))
    }

    pub fn lease(&self) -> Result<&BrowserLease, SessionError> {
        self.inner
            .lease
            .as_ref()
            .ok_or_else(|| SessionError::PageUnavailable("session already disposed".to_string()))
    }
}

/// Bounded map of client-named sessions with background expiry.
pub struct SessionManager {
    settings: SessionSettings,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    shutdown: CancellationToken,
    cleanup_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(settings: SessionSettings) -> Arc<Self> {
        let manager = Arc::new(Self {
            settings,
            sessions: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            cleanup_task: std::sync::Mutex::new(None),
        });
        manager.spawn_cleanup_loop();
        manager
    }

    fn spawn_cleanup_loop(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.settings.cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = ticker.tick() => manager.cleanup_expired().await,
                }
            }
        });
        *self
            .cleanup_task
            .lock()
            .expect("cleanup task slot poisoned") = Some(task);
    }

    /// Bind `lease` to `id`. On any failure the lease goes straight back to
    /// the pool before the error is returned.
    pub async fn create(
        &self,
        id: &str,
        lease: BrowserLease,
    ) -> Result<Arc<Session>, SessionError> {
        {
            let sessions = self.sessions.read().await;
            if sessions.contains_key(id) {
                lease.release().await;
                return Err(SessionError::AlreadyExists { id: id.to_string() });
            }
            if sessions.len() >= self.settings.max_sessions {
                lease.release().await;
                return Err(SessionError::TooManySessions {
                    max: self.settings.max_sessions,
                });
            }
        }

        let page = match lease.instance().new_page().await {
            Ok(page) => page,
            Err(e) => {
                lease.release().await;
                return Err(SessionError::PageUnavailable(e.to_string()));
            }
        };

        let session = Arc::new(Session::new(id.to_string(), lease, page));
        {
            let mut sessions = self.sessions.write().await;
            // Re-check under the write lock; a racing create may have won.
            if sessions.contains_key(id) {
                drop(sessions);
                session.dispose().await;
                return Err(SessionError::AlreadyExists { id: id.to_string() });
            }
            if sessions.len() >= self.settings.max_sessions {
                drop(sessions);
                session.dispose().await;
                return Err(SessionError::TooManySessions {
                    max: self.settings.max_sessions,
                });
            }
            sessions.insert(id.to_string(), Arc::clone(&session));
        }

        info!(session_id = %id, "session created");
        Ok(session)
    }

    /// Look up a live session and refresh its idle clock.
    pub async fn get(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(id).cloned()
        }
        .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;

        if session.idle_for() > self.settings.ttl {
            return Err(SessionError::Expired { id: id.to_string() });
        }
        session.touch();
        Ok(session)
    }

    /// Remove the session and return its browser to the pool.
    pub async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(id)
        }
        .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;

        session.dispose().await;
        info!(session_id = %id, "session destroyed");
        Ok(())
    }

    pub async fn list(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Collect everything past TTL under the write lock, then dispose
    /// outside it so page teardown never blocks lookups.
    async fn cleanup_expired(&self) {
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.idle_for() > self.settings.ttl)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        if expired.is_empty() {
            return;
        }
        info!(count = expired.len(), "expiring idle sessions");
        futures::stream::iter(expired)
            .for_each_concurrent(DISPOSE_CONCURRENCY, |session| async move {
                debug!(session_id = %session.id(), "session expired");
                session.dispose().await;
            })
            .await;
    }

    /// Stop the cleanup loop and dispose of every remaining session,
    /// returning all instances to the pool.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let task = self
            .cleanup_task
            .lock()
            .expect("cleanup task slot poisoned")
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let remaining: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        if !remaining.is_empty() {
            warn!(count = remaining.len(), "disposing sessions on shutdown");
        }
        futures::stream::iter(remaining)
            .for_each_concurrent(DISPOSE_CONCURRENCY, |session| async move {
                session.dispose().await;
            })
            .await;
    }
}
