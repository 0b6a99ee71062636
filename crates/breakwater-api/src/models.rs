//! Wire models for the command envelope and its responses.

use breakwater_types::{Cookie, ProxyConfig, RateLimitInfo};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Inbound command envelope accepted on `POST /v1` and `POST /api`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1Request {
    pub cmd: String,

    #[serde(default)]
    pub url: Option<String>,

    /// Session id for session-bound commands and session-bound requests.
    #[serde(default)]
    pub session: Option<String>,

    /// Accepted for wire compatibility; reserved, not applied.
    #[serde(default)]
    pub session_ttl_minutes: Option<u64>,

    /// Per-request budget in milliseconds.
    #[serde(default)]
    pub max_timeout: Option<u64>,

    #[serde(default)]
    pub cookies: Vec<Cookie>,

    /// Extra request headers, applied to every fetch the page makes.
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,

    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    /// Urlencoded form body for `request.post`.
    #[serde(default)]
    pub post_data: Option<String>,

    #[serde(default)]
    pub return_only_cookies: bool,

    #[serde(default)]
    pub return_screenshot: bool,

    #[serde(default)]
    pub disable_media: bool,

    #[serde(default)]
    pub wait_in_seconds: Option<u64>,
}

/// The solved page, shaped for existing challenge-solver clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Solution {
    pub url: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub cookies: Vec<Cookie>,
    pub user_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turnstile_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_delay_ms: Option<u64>,
}

impl Solution {
    /// Stamp classifier hints onto the solution when pushback was detected.
    pub fn apply_rate_limit_info(&mut self, info: &RateLimitInfo) {
        if !info.detected {
            return;
        }
        self.rate_limited = Some(true);
        self.error_code = info.error_code.clone();
        self.error_category = info.category.map(|c| c.as_str().to_string());
        self.suggested_delay_ms = Some(info.suggested_delay_ms);
    }
}

/// Outbound envelope. Command failures still serialise as HTTP 200 bodies
/// with `status = "error"`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct V1Response {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<Solution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_delay_ms: Option<u64>,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub version: String,
}

impl V1Response {
    fn base(status: &str, message: impl Into<String>, started: i64) -> Self {
        Self {
            status: status.to_string(),
            message: message.into(),
            solution: None,
            session: None,
            sessions: None,
            rate_limited: None,
            error_code: None,
            error_category: None,
            suggested_delay_ms: None,
            start_timestamp: started,
            end_timestamp: Utc::now().timestamp_millis(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn ok(message: impl Into<String>, started: i64) -> Self {
        Self::base("ok", message, started)
    }

    pub fn error(message: impl Into<String>, started: i64) -> Self {
        Self::base("error", message, started)
    }

    pub fn with_solution(mut self, solution: Solution) -> Self {
        self.solution = Some(solution);
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_sessions(mut self, sessions: Vec<String>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Attach the retry hint block to an error envelope.
    pub fn with_rate_limit_info(mut self, info: &RateLimitInfo) -> Self {
        if info.detected {
            self.rate_limited = Some(true);
            self.error_code = info.error_code.clone();
            self.error_category = info.category.map(|c| c.as_str().to_string());
            self.suggested_delay_ms = Some(info.suggested_delay_ms);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breakwater_types::RateLimitCategory;

    #[test]
    fn envelope_parses_camel_case_fields() {
        let raw = r#"{
            "cmd": "request.get",
            "url": "https://example.com",
            "maxTimeout": 45000,
            "returnOnlyCookies": true,
            "waitInSeconds": 5
        }"#;
        let request: V1Request = serde_json::from_str(raw).unwrap();
        assert_eq!(request.cmd, "request.get");
        assert_eq!(request.max_timeout, Some(45_000));
        assert!(request.return_only_cookies);
        assert_eq!(request.wait_in_seconds, Some(5));
    }

    #[test]
    fn session_ttl_is_parsed_but_reserved() {
        let raw = r#"{ "cmd": "sessions.create", "session": "s1", "sessionTtlMinutes": 10 }"#;
        let request: V1Request = serde_json::from_str(raw).unwrap();
        assert_eq!(request.session_ttl_minutes, Some(10));
    }

    #[test]
    fn undetected_hints_leave_solution_untouched() {
        let mut solution = Solution {
            url: "https://example.com".to_string(),
            status: 200,
            response: Some("<html>ok</html>".to_string()),
            cookies: Vec::new(),
            user_agent: "UA".to_string(),
            screenshot: None,
            turnstile_token: None,
            rate_limited: None,
            error_code: None,
            error_category: None,
            suggested_delay_ms: None,
        };
        solution.apply_rate_limit_info(&RateLimitInfo::undetected());
        let json = serde_json::to_value(&solution).unwrap();
        assert!(json.get("rateLimited").is_none());
    }

    #[test]
    fn detected_hints_flow_into_the_wire_shape() {
        let mut solution = Solution {
            url: "https://example.com".to_string(),
            status: 429,
            response: Some("slow down".to_string()),
            cookies: Vec::new(),
            user_agent: "UA".to_string(),
            screenshot: None,
            turnstile_token: None,
            rate_limited: None,
            error_code: None,
            error_category: None,
            suggested_delay_ms: None,
        };
        solution.apply_rate_limit_info(&RateLimitInfo::detected(
            "HTTP_429",
            RateLimitCategory::RateLimit,
            60_000,
            "origin replied 429",
        ));
        let json = serde_json::to_value(&solution).unwrap();
        assert_eq!(json["rateLimited"], true);
        assert_eq!(json["errorCode"], "HTTP_429");
        assert_eq!(json["errorCategory"], "rate_limit");
        assert_eq!(json["suggestedDelayMs"], 60_000);
    }
}
