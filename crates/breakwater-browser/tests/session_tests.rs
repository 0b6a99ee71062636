mod common;

use breakwater_browser::{BrowserPool, SessionManager};
use breakwater_types::{SessionError, SessionSettings};
use common::{fast_pool_settings, MockLauncher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fast_session_settings() -> SessionSettings {
    SessionSettings {
        max_sessions: 10,
        ttl: Duration::from_secs(3600),
        cleanup_interval: Duration::from_secs(3600),
    }
}

#[tokio::test]
async fn session_lifecycle_binds_one_browser() {
    let launcher = Arc::new(MockLauncher::default());
    let pool = BrowserPool::new(fast_pool_settings(2), launcher)
        .await
        .unwrap();
    let manager = SessionManager::new(fast_session_settings());
    let cancel = CancellationToken::new();

    let lease = pool.acquire(&cancel).await.unwrap();
    let leased_id = lease.browser_id();
    let session = manager.create("s1", lease).await.unwrap();
    assert_eq!(session.browser_id().await, Some(leased_id));
    assert_eq!(manager.list().await, vec!["s1".to_string()]);

    // Every lookup within TTL resolves to the same instance.
    for _ in 0..3 {
        let looked_up = manager.get("s1").await.unwrap();
        assert_eq!(looked_up.browser_id().await, Some(leased_id));
    }

    manager.destroy("s1").await.unwrap();
    assert!(matches!(
        manager.get("s1").await,
        Err(SessionError::NotFound { .. })
    ));
    // The browser went back to the pool.
    assert_eq!(pool.status().available, 2);

    manager.close().await;
    pool.close().await;
}

#[tokio::test]
async fn duplicate_create_releases_the_new_lease() {
    let launcher = Arc::new(MockLauncher::default());
    let pool = BrowserPool::new(fast_pool_settings(2), launcher)
        .await
        .unwrap();
    let manager = SessionManager::new(fast_session_settings());
    let cancel = CancellationToken::new();

    let first = pool.acquire(&cancel).await.unwrap();
    manager.create("dup", first).await.unwrap();

    let second = pool.acquire(&cancel).await.unwrap();
    let err = manager.create("dup", second).await.unwrap_err();
    assert!(matches!(err, SessionError::AlreadyExists { .. }));
    // The rejected lease must not leak: one browser in the session, one back
    // in the queue.
    assert_eq!(pool.status().available, 1);

    manager.close().await;
    pool.close().await;
}

#[tokio::test]
async fn session_limit_is_enforced() {
    let launcher = Arc::new(MockLauncher::default());
    let pool = BrowserPool::new(fast_pool_settings(2), launcher)
        .await
        .unwrap();
    let manager = SessionManager::new(SessionSettings {
        max_sessions: 1,
        ..fast_session_settings()
    });
    let cancel = CancellationToken::new();

    let first = pool.acquire(&cancel).await.unwrap();
    manager.create("a", first).await.unwrap();

    let second = pool.acquire(&cancel).await.unwrap();
    let err = manager.create("b", second).await.unwrap_err();
    assert!(matches!(err, SessionError::TooManySessions { max: 1 }));
    assert_eq!(pool.status().available, 1);

    manager.close().await;
    pool.close().await;
}

#[tokio::test]
async fn expired_sessions_are_cleaned_up_and_returned() {
    let launcher = Arc::new(MockLauncher::default());
    let pool = BrowserPool::new(fast_pool_settings(2), launcher)
        .await
        .unwrap();
    let manager = SessionManager::new(SessionSettings {
        max_sessions: 10,
        ttl: Duration::from_millis(50),
        cleanup_interval: Duration::from_millis(50),
    });
    let cancel = CancellationToken::new();

    let lease = pool.acquire(&cancel).await.unwrap();
    manager.create("ephemeral", lease).await.unwrap();
    assert_eq!(pool.status().available, 1);

    // After TTL + cleanup interval the session is gone and the browser is
    // back in the pool.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match manager.get("ephemeral").await {
            Err(SessionError::NotFound { .. }) => break,
            _ if tokio::time::Instant::now() > deadline => {
                panic!("session was not expired in time");
            }
            _ => tokio::time::sleep(Duration::from_millis(25)).await,
        }
    }
    // Disposal runs after removal; give the release a moment to land.
    while pool.status().available != 2 {
        if tokio::time::Instant::now() > deadline {
            panic!("expired session did not return its browser");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(manager.count().await, 0);

    manager.close().await;
    pool.close().await;
}

#[tokio::test]
async fn manager_close_disposes_every_session() {
    let launcher = Arc::new(MockLauncher::default());
    let pool = BrowserPool::new(fast_pool_settings(3), launcher)
        .await
        .unwrap();
    let manager = SessionManager::new(fast_session_settings());
    let cancel = CancellationToken::new();

    for id in ["a", "b", "c"] {
        let lease = pool.acquire(&cancel).await.unwrap();
        manager.create(id, lease).await.unwrap();
    }
    assert_eq!(pool.status().available, 0);

    manager.close().await;
    assert_eq!(manager.count().await, 0);
    assert_eq!(pool.status().available, 3);

    pool.close().await;
}

#[tokio::test]
async fn active_sessions_survive_cleanup() {
    let launcher = Arc::new(MockLauncher::default());
    let pool = BrowserPool::new(fast_pool_settings(1), launcher)
        .await
        .unwrap();
    let manager = SessionManager::new(SessionSettings {
        max_sessions: 10,
        ttl: Duration::from_millis(200),
        cleanup_interval: Duration::from_millis(50),
    });
    let cancel = CancellationToken::new();

    let lease = pool.acquire(&cancel).await.unwrap();
    manager.create("busy", lease).await.unwrap();

    // Keep touching the session; it must never expire while in use.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        manager.get("busy").await.expect("session expired under use");
    }

    manager.close().await;
    pool.close().await;
}
