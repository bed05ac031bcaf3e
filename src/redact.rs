use once_cell::sync::Lazy;
use regex::Regex;

static BEARER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").expect("bearer pattern"));
static PROVIDER_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"sk-[A-Za-z0-9_-]{4,}").expect("provider key pattern"));
static PLATFORM_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"vlx_[A-Za-z0-9]{4,}").expect("platform key pattern"));
static DB_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"postgres(?:ql)?://\S+").expect("db url pattern"));

const PLACEHOLDER: &str = "[redacted]";

/// Scrubs credential-shaped substrings from a message before it reaches a
/// response body or log line. Applied at the error boundary.
pub fn scrub(message: &str) -> String {
    let message = BEARER.replace_all(message, PLACEHOLDER);
    let message = PROVIDER_KEY.replace_all(&message, PLACEHOLDER);
    let message = PLATFORM_KEY.replace_all(&message, PLACEHOLDER);
    DB_URL.replace_all(&message, PLACEHOLDER).into_owned()
}
