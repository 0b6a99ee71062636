//! Service configuration, read from the environment with sane defaults.

use std::time::Duration;

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env_string(key).map(|v| v.parse::<T>()) {
        Some(Ok(parsed)) => parsed,
        Some(Err(_)) => {
            tracing::warn!(key = key, "unparsable value in environment, using default");
            default
        }
        None => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_string(key).as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        Some(_) => {
            tracing::warn!(key = key, "unparsable boolean in environment, using default");
            default
        }
        None => default,
    }
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(key, default.as_secs()))
}

/// Browser launch settings.
#[derive(Clone, Debug)]
pub struct BrowserSettings {
    pub headless: bool,
    pub ignore_cert_errors: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            ignore_cert_errors: false,
        }
    }
}

/// Browser pool sizing and lifecycle settings.
#[derive(Clone, Debug)]
pub struct PoolSettings {
    /// Fixed number of pre-warmed browser instances.
    pub size: usize,
    /// How long `acquire` waits for a free browser before giving up.
    pub wait_timeout: Duration,
    /// Process RSS threshold that triggers a full recycle.
    pub max_memory_mb: u64,
    /// Instances older than this are recycled by the age loop.
    pub max_instance_age: Duration,
    pub memory_check_interval: Duration,
    pub age_check_interval: Duration,
    pub health_check_timeout: Duration,
    pub recycle_close_timeout: Duration,
    pub recycle_spawn_timeout: Duration,
    /// Unhealthy checkouts tolerated per acquire before erroring out.
    pub acquire_retry_budget: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 3,
            wait_timeout: Duration::from_secs(60),
            max_memory_mb: 2048,
            max_instance_age: Duration::from_secs(30 * 60),
            memory_check_interval: Duration::from_secs(30),
            age_check_interval: Duration::from_secs(60),
            health_check_timeout: Duration::from_secs(5),
            recycle_close_timeout: Duration::from_secs(10),
            recycle_spawn_timeout: Duration::from_secs(30),
            acquire_retry_budget: 5,
        }
    }
}

/// Named-session settings.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub max_sessions: usize,
    pub ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            ttl: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Connection settings for one external captcha provider.
#[derive(Clone, Debug, Default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    /// Override of the provider's default API base URL, mainly for tests.
    pub base_url: Option<String>,
    /// Polling deadline override; providers default to 120 s.
    pub timeout: Option<Duration>,
}

impl ProviderSettings {
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// External-solver chain settings.
#[derive(Clone, Debug)]
pub struct SolverSettings {
    /// Native resolution attempts before escalating. 0 means "default".
    pub native_attempts: u32,
    pub fallback_enabled: bool,
    pub two_captcha: ProviderSettings,
    pub cap_solver: ProviderSettings,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            native_attempts: 3,
            fallback_enabled: true,
            two_captcha: ProviderSettings::default(),
            cap_solver: ProviderSettings::default(),
        }
    }
}

/// Top-level service configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub browser: BrowserSettings,
    pub pool: PoolSettings,
    pub session: SessionSettings,
    pub solver: SolverSettings,
    /// Per-request budget when the client does not send `maxTimeout`.
    pub default_timeout: Duration,
    /// Hard cap applied to client-supplied `maxTimeout`.
    pub max_timeout: Duration,
    /// Pool-wide proxy applied to every queue browser at launch.
    pub proxy_url: Option<String>,
    /// Permit proxies that resolve to loopback/private addresses.
    pub allow_local_proxies: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8191".to_string(),
            browser: BrowserSettings::default(),
            pool: PoolSettings::default(),
            session: SessionSettings::default(),
            solver: SolverSettings::default(),
            default_timeout: Duration::from_secs(60),
            max_timeout: Duration::from_secs(300),
            proxy_url: None,
            allow_local_proxies: false,
        }
    }
}

impl AppConfig {
    /// Build the configuration from `BREAKWATER_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let browser = BrowserSettings {
            headless: env_bool("BREAKWATER_HEADLESS", defaults.browser.headless),
            ignore_cert_errors: env_bool(
                "BREAKWATER_IGNORE_CERT_ERRORS",
                defaults.browser.ignore_cert_errors,
            ),
        };

        let pool = PoolSettings {
            size: env_parse("BREAKWATER_POOL_SIZE", defaults.pool.size).max(1),
            wait_timeout: env_duration_secs("BREAKWATER_POOL_TIMEOUT", defaults.pool.wait_timeout),
            max_memory_mb: env_parse("BREAKWATER_MAX_MEMORY_MB", defaults.pool.max_memory_mb),
            ..defaults.pool
        };

        let session = SessionSettings {
            max_sessions: env_parse("BREAKWATER_MAX_SESSIONS", defaults.session.max_sessions),
            ttl: env_duration_secs("BREAKWATER_SESSION_TTL", defaults.session.ttl),
            cleanup_interval: env_duration_secs(
                "BREAKWATER_SESSION_CLEANUP_INTERVAL",
                defaults.session.cleanup_interval,
            ),
        };

        let solver = SolverSettings {
            native_attempts: env_parse(
                "BREAKWATER_NATIVE_ATTEMPTS",
                defaults.solver.native_attempts,
            ),
            fallback_enabled: env_bool(
                "BREAKWATER_FALLBACK_ENABLED",
                defaults.solver.fallback_enabled,
            ),
            two_captcha: ProviderSettings {
                api_key: env_string("BREAKWATER_2CAPTCHA_API_KEY"),
                base_url: env_string("BREAKWATER_2CAPTCHA_BASE_URL"),
                timeout: env_string("BREAKWATER_2CAPTCHA_TIMEOUT")
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_secs),
            },
            cap_solver: ProviderSettings {
                api_key: env_string("BREAKWATER_CAPSOLVER_API_KEY"),
                base_url: env_string("BREAKWATER_CAPSOLVER_BASE_URL"),
                timeout: env_string("BREAKWATER_CAPSOLVER_TIMEOUT")
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_secs),
            },
        };

        Self {
            bind_addr: env_string("BREAKWATER_BIND").unwrap_or(defaults.bind_addr),
            browser,
            pool,
            session,
            solver,
            default_timeout: env_duration_secs(
                "BREAKWATER_DEFAULT_TIMEOUT",
                defaults.default_timeout,
            ),
            max_timeout: env_duration_secs("BREAKWATER_MAX_TIMEOUT", defaults.max_timeout),
            proxy_url: env_string("BREAKWATER_PROXY_URL"),
            allow_local_proxies: env_bool(
                "BREAKWATER_ALLOW_LOCAL_PROXIES",
                defaults.allow_local_proxies,
            ),
        }
    }

    /// Clamp a client-supplied timeout to the configured maximum.
    pub fn clamp_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }
}
