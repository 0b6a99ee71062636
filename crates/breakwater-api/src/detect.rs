//! Interstitial and denial detection over page HTML.

/// What the observed page looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVerdict {
    /// Ordinary content; the solve is done.
    Clear,
    /// A full-page challenge interstitial that resolves by itself or after
    /// a token lands.
    Interstitial,
    /// Real content carrying an embedded turnstile widget that wants a
    /// token.
    Widget,
    /// The origin refuses this client outright.
    AccessDenied,
}

/// How much of the page is inspected for markers.
const MAX_INSPECT_BYTES: usize = 256 * 1024;

const DENIED_MARKERS: &[&str] = &[
    "attention required! | cloudflare",
    "cf-error-details",
    "you have been blocked",
    "sorry, you have been blocked",
];

const INTERSTITIAL_MARKERS: &[&str] = &[
    "just a moment",
    "checking your browser",
    "challenge-platform",
    "_cf_chl_opt",
    "cf-chl-widget",
    "ddos protection by",
];

const WIDGET_MARKERS: &[&str] = &[
    "challenges.cloudflare.com/turnstile",
    "cf-turnstile",
    "data-sitekey",
];

pub fn inspect(html: &str) -> PageVerdict {
    let mut end = html.len().min(MAX_INSPECT_BYTES);
    while !html.is_char_boundary(end) {
        end -= 1;
    }
    let lowered = html[..end].to_lowercase();

    if DENIED_MARKERS.iter().any(|m| lowered.contains(m)) {
        return PageVerdict::AccessDenied;
    }
    if INTERSTITIAL_MARKERS.iter().any(|m| lowered.contains(m)) {
        return PageVerdict::Interstitial;
    }
    if WIDGET_MARKERS.iter().any(|m| lowered.contains(m)) {
        return PageVerdict::Widget;
    }
    PageVerdict::Clear
}
