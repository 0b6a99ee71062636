mod detect;
mod errors;
mod handlers;
mod models;
mod pipeline;
mod state;
mod validation;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use breakwater_browser::{BrowserPool, ChromiumLauncher, SessionManager};
use breakwater_solver::{
    CapSolverProvider, CaptchaProvider, SolverChain, SolverMetrics, TwoCaptchaProvider,
};
use breakwater_types::AppConfig;
use pipeline::SolvePipeline;
use state::{AppState, DomainStats};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

/// Inbound bodies are capped well above any legitimate command envelope.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .json()
        .init();

    let config = Arc::new(AppConfig::from_env());
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind_addr,
        pool_size = config.pool.size,
        headless = config.browser.headless,
        max_sessions = config.session.max_sessions,
        two_captcha = config.solver.two_captcha.is_configured(),
        cap_solver = config.solver.cap_solver.is_configured(),
        "starting breakwater"
    );

    let launcher = Arc::new(ChromiumLauncher::new(
        config.browser.clone(),
        config.proxy_url.clone(),
    ));
    let pool = BrowserPool::new(config.pool.clone(), launcher).await?;
    let sessions = SessionManager::new(config.session.clone());

    let metrics = Arc::new(SolverMetrics::new());
    let providers: Vec<Arc<dyn CaptchaProvider>> = vec![
        Arc::new(TwoCaptchaProvider::from_settings(&config.solver.two_captcha)?),
        Arc::new(CapSolverProvider::from_settings(&config.solver.cap_solver)?),
    ];
    let chain = Arc::new(SolverChain::new(&config.solver, providers, metrics.clone()));
    let pipeline = Arc::new(SolvePipeline::new(chain.clone()));

    // Surface dead provider credentials in the logs right away.
    tokio::spawn({
        let chain = chain.clone();
        async move { chain.refresh_balances().await }
    });

    let app_state = AppState {
        config: config.clone(),
        pool: pool.clone(),
        sessions: sessions.clone(),
        chain,
        metrics,
        pipeline,
        domains: Arc::new(DomainStats::new()),
        started_at: Instant::now(),
    };

    let app = Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/v1", post(handlers::command))
        .route("/api", post(handlers::command))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "breakwater listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("draining sessions and closing the browser pool");
    sessions.close().await;
    pool.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
