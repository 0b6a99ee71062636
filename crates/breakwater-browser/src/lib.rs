//! # Breakwater Browser
//!
//! Browser process management for the breakwater service: a typed driver
//! seam over CDP, a launcher that spawns isolated Chromium processes, a
//! fixed-capacity pool with health checks and recycling, and a TTL-bound
//! session manager that binds pool browsers to client identifiers.
//!
//! ## Architecture
//!
//! The pool is the sole owner of every browser it spawns. A checkout hands
//! the caller a [`BrowserLease`]; the lease either returns the instance to
//! the pool's ready queue or (when the pool has closed underneath it) closes
//! the instance. Sessions hold a lease for their whole lifetime and give it
//! back on destroy or expiry.
//!
//! ```no_run
//! # use breakwater_browser::{BrowserPool, ChromiumLauncher};
//! # use breakwater_types::{BrowserSettings, PoolSettings};
//! # use std::sync::Arc;
//! # async fn example() -> Result<(), breakwater_types::PoolError> {
//! let launcher = Arc::new(ChromiumLauncher::new(BrowserSettings::default(), None));
//! let pool = BrowserPool::new(PoolSettings::default(), launcher).await?;
//!
//! let cancel = tokio_util::sync::CancellationToken::new();
//! let lease = pool.acquire(&cancel).await?;
//! let page = lease.instance().new_page().await.unwrap();
//! page.navigate("https://example.com").await.unwrap();
//! lease.release().await;
//! # Ok(())
//! # }
//! ```

pub mod chromium;
pub mod driver;
pub mod instance;
pub mod pool;
pub mod session;
pub mod stealth;

pub use chromium::ChromiumLauncher;
pub use driver::{BrowserHandle, BrowserLauncher, DriverError, LaunchOptions, PageHandle};
pub use instance::BrowserInstance;
pub use pool::{BrowserLease, BrowserPool, PoolStatus};
pub use session::{Session, SessionGuard, SessionManager};
