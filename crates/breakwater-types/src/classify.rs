//! Machine-readable hints produced by the response classifier.

use serde::{Deserialize, Serialize};

/// Why the origin pushed back, from the client's retry point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitCategory {
    RateLimit,
    AccessDenied,
    Captcha,
    GeoBlocked,
}

impl RateLimitCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitCategory::RateLimit => "rate_limit",
            RateLimitCategory::AccessDenied => "access_denied",
            RateLimitCategory::Captcha => "captcha",
            RateLimitCategory::GeoBlocked => "geo_blocked",
        }
    }
}

/// Classifier verdict on a final response. `detected == false` means the
/// response looks ordinary and the remaining fields carry no meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<RateLimitCategory>,
    pub suggested_delay_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RateLimitInfo {
    pub fn undetected() -> Self {
        Self {
            detected: false,
            error_code: None,
            category: None,
            suggested_delay_ms: 0,
            description: None,
        }
    }

    pub fn detected(
        error_code: impl Into<String>,
        category: RateLimitCategory,
        suggested_delay_ms: u64,
        description: impl Into<String>,
    ) -> Self {
        // Retrying a captcha or geo block without changing anything is
        // pointless, so those categories never suggest a delay.
        let suggested_delay_ms = match category {
            RateLimitCategory::Captcha | RateLimitCategory::GeoBlocked => 0,
            _ => suggested_delay_ms,
        };
        Self {
            detected: true,
            error_code: Some(error_code.into()),
            category: Some(category),
            suggested_delay_ms,
            description: Some(description.into()),
        }
    }
}

impl Default for RateLimitInfo {
    fn default() -> Self {
        Self::undetected()
    }
}
