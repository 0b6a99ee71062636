//! Anti-detection page preparation.
//!
//! Challenge pages actively probe for automation markers; these payloads
//! are installed as new-document scripts so they run before any origin JS
//! on every navigation. Failures are logged and skipped: a partially
//! prepared page still beats no page.

use crate::driver::PageHandle;
use tracing::debug;

/// navigator.webdriver is the first thing every detector looks at.
const WEBDRIVER_JS: &str = r#"
Object.defineProperty(navigator, 'webdriver', {
    get: () => undefined,
});
"#;

const LANGUAGES_JS: &str = r#"
Object.defineProperty(navigator, 'languages', {
    get: () => ['en-US', 'en'],
});
"#;

/// A headless profile ships zero plugins; real Chrome never does.
const PLUGINS_JS: &str = r#"
Object.defineProperty(navigator, 'plugins', {
    get: () => [
        {
            name: 'Chrome PDF Plugin',
            description: 'Portable Document Format',
            filename: 'internal-pdf-viewer',
        },
        {
            name: 'Chrome PDF Viewer',
            description: '',
            filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai',
        },
    ],
});
"#;

/// Extensions expose chrome.runtime; headless Chrome leaves window.chrome
/// bare.
const CHROME_RUNTIME_JS: &str = r#"
if (!window.chrome) {
    window.chrome = {};
}
if (!window.chrome.runtime) {
    window.chrome.runtime = {
        connect: () => ({
            onMessage: { addListener: () => {}, removeListener: () => {} },
            postMessage: () => {},
        }),
    };
}
"#;

/// Mask the SwiftShader renderer headless Chrome reports.
const WEBGL_VENDOR_JS: &str = r#"
if (window.WebGLRenderingContext) {
    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = new Proxy(getParameter, {
        apply: function (target, ctx, args) {
            const param = (args && args[0]) || null;
            if (param === 37445) {
                return 'Intel Inc.';
            }
            if (param === 37446) {
                return 'Intel Iris OpenGL Engine';
            }
            return Reflect.apply(target, ctx, args);
        },
    });
}
"#;

const PAYLOADS: [(&str, &str); 5] = [
    ("webdriver", WEBDRIVER_JS),
    ("languages", LANGUAGES_JS),
    ("plugins", PLUGINS_JS),
    ("chrome_runtime", CHROME_RUNTIME_JS),
    ("webgl_vendor", WEBGL_VENDOR_JS),
];

/// Install every evasion payload on the page. Individual failures are
/// non-critical.
pub async fn prepare_page(page: &dyn PageHandle) {
    for (name, payload) in PAYLOADS {
        if let Err(e) = page.install_init_script(payload).await {
            debug!(payload = name, error = %e, "stealth payload failed to install");
        }
    }
}
