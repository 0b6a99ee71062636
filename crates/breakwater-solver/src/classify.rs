//! Pattern-based detection of rate limits and access denials in final
//! responses.
//!
//! `classify` is a pure function: identical inputs always produce identical
//! hints. Bodies are truncated before any regex runs, and every pattern uses
//! bounded gap operators so matching stays linear on hostile input.

use breakwater_types::{RateLimitCategory, RateLimitInfo};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Body bytes scanned at most; everything past this is ignored.
const MAX_SCAN_BYTES: usize = 100 * 1024;

struct BodyPattern {
    regex: Regex,
    code: &'static str,
    category: RateLimitCategory,
    delay_ms: u64,
    description: &'static str,
}

fn pattern(
    expr: &str,
    code: &'static str,
    category: RateLimitCategory,
    delay_ms: u64,
    description: &'static str,
) -> BodyPattern {
    BodyPattern {
        regex: RegexBuilder::new(expr)
            .case_insensitive(true)
            .build()
            .expect("invalid classifier pattern"),
        code,
        category,
        delay_ms,
        description,
    }
}

fn cloudflare_code(
    digits: &str,
    code: &'static str,
    category: RateLimitCategory,
    delay_ms: u64,
    description: &'static str,
) -> BodyPattern {
    // Matches "Error code: 1015", "error 1015" and the markup variant
    // <span class="cf-error-code">1015</span>, with bounded gaps only.
    let expr = format!(
        r#"(error[\s:]{{0,8}}(code[\s:]{{0,8}})?|cf-error-code[^0-9]{{0,24}}){digits}\b"#
    );
    pattern(&expr, code, category, delay_ms, description)
}

/// Ordered most-specific first; the first match wins.
static BODY_PATTERNS: Lazy<Vec<BodyPattern>> = Lazy::new(|| {
    use RateLimitCategory::*;
    vec![
        cloudflare_code("1015", "CF_1015", RateLimit, 60_000, "Cloudflare rate limited"),
        cloudflare_code("1020", "CF_1020", AccessDenied, 30_000, "Cloudflare firewall rule"),
        cloudflare_code("1006", "CF_1006", AccessDenied, 300_000, "Cloudflare IP ban"),
        cloudflare_code("1007", "CF_1007", AccessDenied, 300_000, "Cloudflare IP ban (abuse)"),
        cloudflare_code("1008", "CF_1008", GeoBlocked, 0, "Cloudflare country block"),
        cloudflare_code("1009", "CF_1009", GeoBlocked, 0, "Cloudflare country block"),
        cloudflare_code("1010", "CF_1010", AccessDenied, 30_000, "Cloudflare browser signature ban"),
        cloudflare_code("1012", "CF_1012", AccessDenied, 30_000, "Cloudflare access denied"),
        pattern(
            r"access[\s_-]{0,3}denied",
            "ACCESS_DENIED",
            AccessDenied,
            30_000,
            "access denied marker in body",
        ),
        pattern(
            r"rate[\s_-]{0,3}limit",
            "RATE_LIMITED",
            RateLimit,
            60_000,
            "rate limit marker in body",
        ),
        pattern(
            r"too[\s_-]{1,3}many[\s_-]{1,3}requests",
            "TOO_MANY_REQUESTS",
            RateLimit,
            60_000,
            "too many requests marker in body",
        ),
        pattern(
            r"you\s(have\sbeen\s)?blocked",
            "BLOCKED",
            AccessDenied,
            30_000,
            "block notice in body",
        ),
        pattern(
            r"captcha|hcaptcha|recaptcha|challenge",
            "CAPTCHA",
            Captcha,
            0,
            "captcha or challenge marker in body",
        ),
    ]
});

static CLOUDFLARE_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new("cloudflare")
        .case_insensitive(true)
        .build()
        .expect("invalid cloudflare pattern")
});

fn truncate_body(body: &str) -> &str {
    if body.len() <= MAX_SCAN_BYTES {
        return body;
    }
    let mut end = MAX_SCAN_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Inspect a final response and emit machine-readable retry hints.
pub fn classify(status: u16, body: &str) -> RateLimitInfo {
    let mut info = match status {
        429 => RateLimitInfo::detected(
            "HTTP_429",
            RateLimitCategory::RateLimit,
            60_000,
            "origin replied 429",
        ),
        503 => RateLimitInfo::detected(
            "HTTP_503",
            RateLimitCategory::RateLimit,
            30_000,
            "origin replied 503",
        ),
        _ => RateLimitInfo::undetected(),
    };

    let body = truncate_body(body);
    for p in BODY_PATTERNS.iter() {
        if p.regex.is_match(body) {
            // A body verdict is more specific than the status preset.
            info = RateLimitInfo::detected(p.code, p.category, p.delay_ms, p.description);
            break;
        }
    }

    if !info.detected && status == 403 && CLOUDFLARE_RE.is_match(body) {
        info = RateLimitInfo::detected(
            "CF_403",
            RateLimitCategory::AccessDenied,
            30_000,
            "403 from a Cloudflare front",
        );
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_response_stays_undetected() {
        let info = classify(200, "<html>ok</html>");
        assert!(!info.detected);
        assert_eq!(info.suggested_delay_ms, 0);
    }

    #[test]
    fn status_429_maps_to_preset() {
        let info = classify(429, "slow down");
        assert!(info.detected);
        assert_eq!(info.error_code.as_deref(), Some("HTTP_429"));
        assert_eq!(info.category, Some(RateLimitCategory::RateLimit));
        assert_eq!(info.suggested_delay_ms, 60_000);
    }

    #[test]
    fn status_503_maps_to_preset() {
        let info = classify(503, "maintenance");
        assert_eq!(info.error_code.as_deref(), Some("HTTP_503"));
        assert_eq!(info.suggested_delay_ms, 30_000);
    }

    #[test]
    fn cloudflare_1015_in_body() {
        let info = classify(200, "<html><body>Error code: 1015</body></html>");
        assert_eq!(info.error_code.as_deref(), Some("CF_1015"));
        assert_eq!(info.category, Some(RateLimitCategory::RateLimit));
        assert_eq!(info.suggested_delay_ms, 60_000);
    }

    #[test]
    fn cloudflare_markup_variant_matches() {
        let info = classify(200, r#"<span class="cf-error-code">1020</span>"#);
        assert_eq!(info.error_code.as_deref(), Some("CF_1020"));
        assert_eq!(info.category, Some(RateLimitCategory::AccessDenied));
    }

    #[test]
    fn body_match_overrides_status_preset() {
        let info = classify(429, "Error code: 1020");
        assert_eq!(info.error_code.as_deref(), Some("CF_1020"));
        assert_eq!(info.category, Some(RateLimitCategory::AccessDenied));
    }

    #[test]
    fn geo_block_suggests_no_delay() {
        let info = classify(200, "Error 1009 - access from your country is blocked");
        assert_eq!(info.error_code.as_deref(), Some("CF_1009"));
        assert_eq!(info.category, Some(RateLimitCategory::GeoBlocked));
        assert_eq!(info.suggested_delay_ms, 0);
    }

    #[test]
    fn captcha_marker_suggests_no_delay() {
        let info = classify(200, "please solve this hcaptcha to continue");
        assert_eq!(info.error_code.as_deref(), Some("CAPTCHA"));
        assert_eq!(info.suggested_delay_ms, 0);
    }

    #[test]
    fn forbidden_behind_cloudflare_is_access_denied() {
        let info = classify(403, "<html>served by Cloudflare</html>");
        assert_eq!(info.error_code.as_deref(), Some("CF_403"));
        assert_eq!(info.category, Some(RateLimitCategory::AccessDenied));
        assert_eq!(info.suggested_delay_ms, 30_000);
    }

    #[test]
    fn forbidden_without_cloudflare_stays_undetected() {
        let info = classify(403, "<html>nope</html>");
        assert!(!info.detected);
    }

    #[test]
    fn classification_is_deterministic() {
        let body = "Error code: 1015";
        for _ in 0..10 {
            assert_eq!(classify(200, body), classify(200, body));
        }
    }

    #[test]
    fn body_at_scan_limit_terminates_quickly() {
        // Worst case for the gap patterns: 100 KiB of near-miss prefixes.
        let body = "error code".repeat(MAX_SCAN_BYTES / 10);
        assert!(body.len() >= MAX_SCAN_BYTES);
        let started = std::time::Instant::now();
        let info = classify(200, &body);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert!(!info.detected);
    }

    #[test]
    fn oversized_body_is_truncated_before_matching() {
        // The marker sits past the scan window and must be invisible.
        let mut body = " ".repeat(MAX_SCAN_BYTES);
        body.push_str("Error code: 1015");
        let info = classify(200, &body);
        assert!(!info.detected);
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let mut body = "é".repeat(MAX_SCAN_BYTES / 2 + 10);
        body.push_str("Error code: 1015");
        // Must not panic on a mid-codepoint cut.
        let _ = classify(200, &body);
    }
}
