//! Request-shape validation and log redaction.

use breakwater_types::{Cookie, ProxyConfig, RequestError};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::net::IpAddr;
use url::Url;

pub const MAX_URL_LEN: usize = 8192;
pub const MAX_POST_DATA_BYTES: usize = 256 * 1024;
pub const MAX_COOKIES: usize = 100;
pub const MAX_COOKIE_FIELD_LEN: usize = 4096;
pub const MAX_HEADERS: usize = 50;
pub const MAX_SESSION_ID_LEN: usize = 128;

const PROXY_SCHEMES: &[&str] = &["http", "https", "socks4", "socks5"];

/// Query parameters whose values never reach the logs.
static SENSITIVE_PARAMS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "key",
        "token",
        "api_key",
        "apikey",
        "password",
        "secret",
        "auth",
        "authorization",
        "access_token",
        "session",
        "signature",
    ]
    .into_iter()
    .collect()
});

pub fn validate_target_url(raw: &str) -> Result<Url, RequestError> {
    if raw.is_empty() {
        return Err(RequestError::UrlRequired);
    }
    if raw.len() > MAX_URL_LEN {
        return Err(RequestError::InvalidUrl(format!(
            "url exceeds {} bytes",
            MAX_URL_LEN
        )));
    }
    let url = Url::parse(raw).map_err(|e| RequestError::InvalidUrl(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RequestError::InvalidUrl(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(RequestError::InvalidUrl("url has no host".to_string()));
    }
    Ok(url)
}

pub fn validate_session_id(id: &str) -> Result<(), RequestError> {
    if id.is_empty() {
        return Err(RequestError::InvalidRequest(
            "session id must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return Err(RequestError::InvalidRequest(format!(
            "session id exceeds {} characters",
            MAX_SESSION_ID_LEN
        )));
    }
    if id.chars()
        .any(|c| c.is_whitespace() || c.is_control() || !c.is_ascii())
    {
        return Err(RequestError::InvalidRequest(
            "session id must be printable ASCII without whitespace".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_cookies(cookies: &[Cookie]) -> Result<(), RequestError> {
    if cookies.len() > MAX_COOKIES {
        return Err(RequestError::InvalidRequest(format!(
            "at most {} cookies are accepted",
            MAX_COOKIES
        )));
    }
    for cookie in cookies {
        if cookie.name.is_empty() {
            return Err(RequestError::InvalidRequest(
                "cookie name must not be empty".to_string(),
            ));
        }
        if cookie.name.len() > MAX_COOKIE_FIELD_LEN || cookie.value.len() > MAX_COOKIE_FIELD_LEN {
            return Err(RequestError::InvalidRequest(format!(
                "cookie fields are limited to {} bytes",
                MAX_COOKIE_FIELD_LEN
            )));
        }
    }
    Ok(())
}

pub fn validate_headers(headers: &[(String, String)]) -> Result<(), RequestError> {
    if headers.len() > MAX_HEADERS {
        return Err(RequestError::InvalidRequest(format!(
            "at most {} headers are accepted",
            MAX_HEADERS
        )));
    }
    for (name, _) in headers {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii() && !c.is_control()) {
            return Err(RequestError::InvalidRequest(
                "header names must be printable ASCII".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn validate_post_data(post_data: Option<&str>, is_post: bool) -> Result<(), RequestError> {
    match post_data {
        None | Some("") if is_post => Err(RequestError::PostDataRequired),
        Some(data) if data.len() > MAX_POST_DATA_BYTES => Err(RequestError::InvalidRequest(
            format!("postData exceeds {} bytes", MAX_POST_DATA_BYTES),
        )),
        _ => Ok(()),
    }
}

/// Validate the proxy URL shape and reject SSRF-relevant hosts unless local
/// proxies are explicitly allowed.
pub fn validate_proxy(proxy: &ProxyConfig, allow_local: bool) -> Result<Url, RequestError> {
    let url = Url::parse(&proxy.url)
        .map_err(|e| RequestError::InvalidRequest(format!("invalid proxy url: {}", e)))?;
    if !PROXY_SCHEMES.contains(&url.scheme()) {
        return Err(RequestError::InvalidRequest(format!(
            "unsupported proxy scheme: {}",
            url.scheme()
        )));
    }
    let Some(host) = url.host_str() else {
        return Err(RequestError::InvalidRequest(
            "proxy url has no host".to_string(),
        ));
    };
    if !allow_local && is_local_host(host) {
        return Err(RequestError::InvalidRequest(
            "proxy host resolves to a local address".to_string(),
        ));
    }
    Ok(url)
}

fn is_local_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    // Literal addresses only; hostnames are not resolved here.
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    match literal.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unspecified(),
        Err(_) => false,
    }
}

/// Render a URL with sensitive query parameter values masked, for logging.
pub fn redact_url(url: &Url) -> String {
    if url.query().is_none() {
        return url.to_string();
    }
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if SENSITIVE_PARAMS.contains(k.to_ascii_lowercase().as_str()) {
                (k.into_owned(), "REDACTED".to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();
    redacted
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    redacted.to_string()
}
