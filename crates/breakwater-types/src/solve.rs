//! Request/response data model for a single solve.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cookie in the wire format clients send and receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Seconds since the epoch; absent for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires: None,
            http_only: None,
            secure: None,
            same_site: None,
        }
    }
}

/// An outbound proxy for a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Everything the pipeline needs to drive one fetch.
#[derive(Debug, Clone)]
pub struct SolveOptions {
    pub url: String,
    /// Total budget for the whole solve, navigation included.
    pub timeout: Duration,
    pub cookies: Vec<Cookie>,
    /// Extra request headers attached to every fetch the page makes.
    pub headers: Vec<(String, String)>,
    pub proxy: Option<ProxyConfig>,
    pub post_data: Option<String>,
    pub is_post: bool,
    pub screenshot: bool,
    pub disable_media: bool,
    /// Extra settle time after the challenge clears, in seconds.
    pub wait_seconds: u64,
}

impl SolveOptions {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            cookies: Vec::new(),
            headers: Vec::new(),
            proxy: None,
            post_data: None,
            is_post: false,
            screenshot: false,
            disable_media: false,
            wait_seconds: 0,
        }
    }

    /// The post-challenge settle delay, clamped to [0, 60] seconds.
    pub fn clamped_wait(&self) -> Duration {
        Duration::from_secs(self.wait_seconds.min(60))
    }
}

/// The outcome of one successful solve.
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub url: String,
    pub html: String,
    pub status_code: u16,
    pub cookies: Vec<Cookie>,
    pub user_agent: String,
    pub screenshot: Option<Vec<u8>>,
    pub turnstile_token: Option<String>,
}
