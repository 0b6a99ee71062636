//! Fixed-capacity browser pool with health checks and recycling.
//!
//! The pool keeps its instances in an arena: a fixed slot table indexed by
//! position, plus a bounded queue of ready slot indices. Checkout moves the
//! instance out of its slot into a [`BrowserLease`]; return moves it back
//! and re-offers the index. An instance is therefore always in exactly one
//! place: the arena (ready), a lease (checked out), or gone (recycled).

use crate::driver::{BrowserLauncher, LaunchOptions};
use crate::instance::BrowserInstance;
use breakwater_types::{PoolError, PoolSettings};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How many instances close() tears down at once.
const CLOSE_CONCURRENCY: usize = 4;

struct PoolSlot {
    instance: Option<BrowserInstance>,
    created_at: Instant,
    use_count: u64,
}

impl PoolSlot {
    fn fresh(instance: BrowserInstance) -> Self {
        Self {
            instance: Some(instance),
            created_at: Instant::now(),
            use_count: 0,
        }
    }
}

/// Counter snapshot for /health reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStatus {
    pub size: usize,
    pub available: usize,
    pub acquired: u64,
    pub released: u64,
    pub recycled: u64,
    pub errors: u64,
}

/// Fixed-size pool of pre-warmed browser processes.
pub struct BrowserPool {
    settings: PoolSettings,
    launcher: Arc<dyn BrowserLauncher>,
    /// The pool mutex: guards the slot table and gates ready-queue offers.
    slots: Mutex<Vec<PoolSlot>>,
    ready_tx: mpsc::Sender<usize>,
    ready_rx: Mutex<mpsc::Receiver<usize>>,
    /// Lock-free mirror of the ready-queue length.
    available: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
    recycled: AtomicU64,
    errors: AtomicU64,
    closed: AtomicBool,
    shutdown: CancellationToken,
    background: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl BrowserPool {
    /// Spawn `settings.size` instances synchronously. If any spawn fails,
    /// every already-spawned instance is closed and the error is returned.
    pub async fn new(
        mut settings: PoolSettings,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Result<Arc<Self>, PoolError> {
        settings.size = settings.size.max(1);
        let size = settings.size;
        info!(size = size, "initializing browser pool");

        let mut instances = Vec::with_capacity(size);
        for i in 0..size {
            match launcher.launch(&LaunchOptions::default()).await {
                Ok(handle) => instances.push(BrowserInstance::new(handle)),
                Err(e) => {
                    error!(slot = i, error = %e, "browser spawn failed during pool init");
                    for instance in &instances {
                        if let Err(close_err) = instance.close().await {
                            debug!(error = %close_err, "failed to close instance during init rollback");
                        }
                    }
                    return Err(PoolError::Crashed(e.to_string()));
                }
            }
        }

        let (ready_tx, ready_rx) = mpsc::channel(size);
        let mut slots = Vec::with_capacity(size);
        for (i, instance) in instances.into_iter().enumerate() {
            slots.push(PoolSlot::fresh(instance));
            ready_tx
                .try_send(i)
                .expect("ready queue sized to pool capacity");
        }

        let pool = Arc::new(Self {
            available: AtomicUsize::new(size),
            settings,
            launcher,
            slots: Mutex::new(slots),
            ready_tx,
            ready_rx: Mutex::new(ready_rx),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            background: std::sync::Mutex::new(Vec::new()),
        });

        pool.spawn_background_loops();
        info!(size = size, "browser pool ready");
        Ok(pool)
    }

    fn spawn_background_loops(self: &Arc<Self>) {
        let memory_loop = {
            let pool = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(pool.settings.memory_check_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = pool.shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            let rss_mb = process_rss_mb();
                            if rss_mb > pool.settings.max_memory_mb {
                                warn!(
                                    rss_mb = rss_mb,
                                    threshold_mb = pool.settings.max_memory_mb,
                                    "memory threshold exceeded, recycling idle browsers"
                                );
                                pool.recycle_all().await;
                            }
                        }
                    }
                }
            })
        };

        let age_loop = {
            let pool = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(pool.settings.age_check_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = pool.shutdown.cancelled() => break,
                        _ = ticker.tick() => pool.recycle_expired().await,
                    }
                }
            })
        };

        let mut background = self.background.lock().expect("background task list poisoned");
        background.push(memory_loop);
        background.push(age_loop);
    }

    /// Wait for a healthy browser, the caller's cancellation, or the pool
    /// wait timeout, whichever comes first.
    pub async fn acquire(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<BrowserLease, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let deadline = tokio::time::Instant::now() + self.settings.wait_timeout;
        let mut failures = 0u32;

        loop {
            let idx = {
                let mut ready = self.ready_rx.lock().await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PoolError::Canceled),
                    _ = self.shutdown.cancelled() => return Err(PoolError::Closed),
                    _ = tokio::time::sleep_until(deadline) => {
                        return Err(PoolError::Timeout(self.settings.wait_timeout));
                    }
                    idx = ready.recv() => match idx {
                        Some(idx) => idx,
                        None => return Err(PoolError::Closed),
                    },
                }
            };
            self.available.fetch_sub(1, Ordering::AcqRel);

            let instance = { self.slots.lock().await[idx].instance.take() };
            let Some(instance) = instance else {
                // Slot was vacated by a concurrent recycle failure.
                continue;
            };

            if instance
                .health_check(self.settings.health_check_timeout)
                .await
            {
                self.slots.lock().await[idx].use_count += 1;
                self.acquired.fetch_add(1, Ordering::Relaxed);
                debug!(browser_id = %instance.id(), slot = idx, "browser checked out");
                return Ok(BrowserLease {
                    pool: Arc::clone(self),
                    kind: LeaseKind::Pooled(idx),
                    instance: Some(instance),
                });
            }

            self.errors.fetch_add(1, Ordering::Relaxed);
            failures += 1;
            warn!(
                browser_id = %instance.id(),
                slot = idx,
                failures = failures,
                "checked-out browser failed health check, recycling"
            );
            let pool = Arc::clone(self);
            tokio::spawn(async move {
                pool.recycle_slot(idx, Some(instance)).await;
            });

            if failures >= self.settings.acquire_retry_budget {
                return Err(PoolError::Exhausted { attempts: failures });
            }
        }
    }

    /// Spawn a dedicated instance bound to a request-scoped proxy. The
    /// instance lives outside the ready queue and is closed on release.
    pub async fn acquire_dedicated(
        self: &Arc<Self>,
        proxy_url: &str,
    ) -> Result<BrowserLease, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let overrides = LaunchOptions {
            proxy_url: Some(proxy_url.to_string()),
        };
        let handle = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(PoolError::Closed),
            spawned = tokio::time::timeout(
                self.settings.recycle_spawn_timeout,
                self.launcher.launch(&overrides),
            ) => match spawned {
                Ok(Ok(handle)) => handle,
                Ok(Err(e)) => return Err(PoolError::Crashed(e.to_string())),
                Err(_) => return Err(PoolError::Timeout(self.settings.recycle_spawn_timeout)),
            },
        };
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(BrowserLease {
            pool: Arc::clone(self),
            kind: LeaseKind::Dedicated,
            instance: Some(BrowserInstance::new(handle)),
        })
    }

    async fn release_inner(&self, kind: LeaseKind, instance: BrowserInstance) {
        instance.scrub_pages().await;
        self.released.fetch_add(1, Ordering::Relaxed);

        let to_close = match kind {
            LeaseKind::Dedicated => Some(instance),
            LeaseKind::Pooled(idx) => {
                let mut slots = self.slots.lock().await;
                if self.closed.load(Ordering::Acquire) {
                    Some(instance)
                } else {
                    slots[idx].instance = Some(instance);
                    match self.ready_tx.try_send(idx) {
                        Ok(()) => {
                            self.available.fetch_add(1, Ordering::AcqRel);
                            None
                        }
                        // Queue closed or over capacity: the instance has
                        // nowhere to go.
                        Err(_) => slots[idx].instance.take(),
                    }
                }
            }
        };

        if let Some(instance) = to_close {
            debug!(browser_id = %instance.id(), "closing browser on release");
            if let Err(e) = instance.close().await {
                debug!(error = %e, "failed to close browser on release");
            }
        }
    }

    /// Close one slot's instance and spawn its replacement. The shutdown
    /// signal always wins against the close/spawn timeouts.
    async fn recycle_slot(&self, idx: usize, old: Option<BrowserInstance>) {
        if let Some(old) = old {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = old.close().await;
                    return;
                }
                closed = tokio::time::timeout(self.settings.recycle_close_timeout, old.close()) => {
                    match closed {
                        Ok(Err(e)) => debug!(slot = idx, error = %e, "failed to close old browser"),
                        Err(_) => warn!(slot = idx, "closing old browser timed out"),
                        Ok(Ok(())) => {}
                    }
                }
            }
        }

        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let launch_options = LaunchOptions::default();
        let spawned = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            spawned = tokio::time::timeout(
                self.settings.recycle_spawn_timeout,
                self.launcher.launch(&launch_options),
            ) => spawned,
        };

        match spawned {
            Ok(Ok(handle)) => {
                let instance = BrowserInstance::new(handle);
                let browser_id = instance.id();
                let mut to_close = None;
                {
                    let mut slots = self.slots.lock().await;
                    if self.closed.load(Ordering::Acquire) {
                        to_close = Some(instance);
                    } else {
                        slots[idx] = PoolSlot::fresh(instance);
                        match self.ready_tx.try_send(idx) {
                            Ok(()) => {
                                self.available.fetch_add(1, Ordering::AcqRel);
                            }
                            Err(_) => to_close = slots[idx].instance.take(),
                        }
                    }
                }
                if let Some(instance) = to_close {
                    let _ = instance.close().await;
                } else {
                    self.recycled.fetch_add(1, Ordering::Relaxed);
                    debug!(browser_id = %browser_id, slot = idx, "browser recycled");
                }
            }
            Ok(Err(e)) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(slot = idx, error = %e, "replacement spawn failed, slot left vacant");
            }
            Err(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(slot = idx, "replacement spawn timed out, slot left vacant");
            }
        }
    }

    /// Recycle every instance currently sitting in the ready queue.
    /// Checked-out instances are untouched; they are health-checked on their
    /// next checkout anyway.
    pub async fn recycle_all(&self) {
        let drained = self.drain_ready().await;
        if drained.is_empty() {
            return;
        }
        let mut jobs = Vec::with_capacity(drained.len());
        for idx in drained {
            let old = { self.slots.lock().await[idx].instance.take() };
            jobs.push(self.recycle_slot(idx, old));
        }
        futures::future::join_all(jobs).await;
    }

    /// Recycle ready instances past the maximum age; re-offer the rest.
    async fn recycle_expired(&self) {
        let drained = self.drain_ready().await;
        let mut jobs = Vec::new();
        for idx in drained {
            let expired_instance = {
                let mut slots = self.slots.lock().await;
                if slots[idx].created_at.elapsed() > self.settings.max_instance_age {
                    slots[idx].instance.take()
                } else {
                    None
                }
            };
            match expired_instance {
                Some(old) => jobs.push(self.recycle_slot(idx, Some(old))),
                None => {
                    // Still fresh: put the index straight back.
                    let slots = self.slots.lock().await;
                    if !self.closed.load(Ordering::Acquire)
                        && self.ready_tx.try_send(idx).is_ok()
                    {
                        self.available.fetch_add(1, Ordering::AcqRel);
                    }
                    drop(slots);
                }
            }
        }
        if !jobs.is_empty() {
            debug!(count = jobs.len(), "recycling aged browsers");
            futures::future::join_all(jobs).await;
        }
    }

    async fn drain_ready(&self) -> Vec<usize> {
        let mut ready = self.ready_rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(idx) = ready.try_recv() {
            self.available.fetch_sub(1, Ordering::AcqRel);
            drained.push(idx);
        }
        drained
    }

    /// Tear down the pool. Idempotent: a second call is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("closing browser pool");
        self.shutdown.cancel();

        let background: Vec<JoinHandle<()>> = {
            let mut tasks = self.background.lock().expect("background task list poisoned");
            tasks.drain(..).collect()
        };
        for task in background {
            let _ = task.await;
        }

        let instances: Vec<BrowserInstance> = {
            let mut slots = self.slots.lock().await;
            slots.iter_mut().filter_map(|s| s.instance.take()).collect()
        };
        let close_timeout = self.settings.recycle_close_timeout;
        futures::stream::iter(instances)
            .for_each_concurrent(CLOSE_CONCURRENCY, |instance| async move {
                match tokio::time::timeout(close_timeout, instance.close()).await {
                    Ok(Err(e)) => {
                        debug!(browser_id = %instance.id(), error = %e, "failed to close browser")
                    }
                    Err(_) => warn!(browser_id = %instance.id(), "browser close timed out"),
                    Ok(Ok(())) => {}
                }
            })
            .await;

        {
            let _slots = self.slots.lock().await;
            let mut ready = self.ready_rx.lock().await;
            ready.close();
            while ready.try_recv().is_ok() {}
        }
        self.available.store(0, Ordering::Release);
        info!("browser pool closed");
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.settings.size,
            available: self.available.load(Ordering::Acquire),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug)]
enum LeaseKind {
    Pooled(usize),
    Dedicated,
}

/// Exclusive checkout of one browser instance.
///
/// Prefer [`BrowserLease::release`]; dropping a lease falls back to a
/// best-effort background return.
pub struct BrowserLease {
    pool: Arc<BrowserPool>,
    kind: LeaseKind,
    instance: Option<BrowserInstance>,
}

impl std::fmt::Debug for BrowserLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserLease").finish_non_exhaustive()
    }
}

impl BrowserLease {
    pub fn instance(&self) -> &BrowserInstance {
        self.instance
            .as_ref()
            .expect("lease instance present until release")
    }

    pub fn browser_id(&self) -> uuid::Uuid {
        self.instance().id()
    }

    /// Return the browser to the pool (or close it, for dedicated leases).
    pub async fn release(mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.release_inner(self.kind, instance).await;
        }
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            warn!(
                browser_id = %instance.id(),
                "browser lease dropped without release, returning in background"
            );
            let pool = Arc::clone(&self.pool);
            let kind = self.kind;
            tokio::spawn(async move {
                pool.release_inner(kind, instance).await;
            });
        }
    }
}

/// Resident set size of this process in MiB.
fn process_rss_mb() -> u64 {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new().with_memory(),
    );
    system
        .process(pid)
        .map(|p| p.memory() / (1024 * 1024))
        .unwrap_or(0)
}
