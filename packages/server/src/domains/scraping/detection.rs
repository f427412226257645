//! Recognising error pages and anti-bot challenges from a rendered page.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};

use super::parse::{lowercase_prefix, visible_text};

/// Body characters inspected for challenge wording.
pub const CHALLENGE_TEXT_WINDOW: usize = 500;

/// Body characters inspected for error wording.
pub const ERROR_TEXT_WINDOW: usize = 1000;

const ERROR_PHRASES: &[&str] = &["something went wrong", "try again", "server error"];

const CHALLENGE_PHRASES: &[&str] = &[
    "verify",
    "unusual traffic",
    "check that you are a real person",
    "continue to tiktok",
];

/// Captcha and interstitial markers searched for in the raw markup.
const CHALLENGE_MARKERS: &[&str] = &[
    "data-captcha",
    "hcaptcha",
    "cf-chl-bypass",
    "just a moment...",
    "verify you are human",
    "access denied",
];

lazy_static! {
    static ref VERIFY_PATH: Regex = Regex::new(r"(?i)/verify/").unwrap();
}

pub fn is_challenge_url(url: &str) -> bool {
    VERIFY_PATH.is_match(url) || url.contains("verify/bot")
}

pub fn looks_like_error_page(html: &str) -> bool {
    let document = Html::parse_document(html);
    let text = lowercase_prefix(&visible_text(&document), ERROR_TEXT_WINDOW);
    if ERROR_PHRASES.iter().any(|p| text.contains(p)) {
        return true;
    }
    Selector::parse(r#"[data-e2e="error-page"]"#)
        .map(|s| document.select(&s).next().is_some())
        .unwrap_or(false)
}

pub fn looks_like_challenge(url: &str, html: &str) -> bool {
    if is_challenge_url(url) {
        return true;
    }
    let document = Html::parse_document(html);
    let text = lowercase_prefix(&visible_text(&document), CHALLENGE_TEXT_WINDOW);
    if CHALLENGE_PHRASES.iter().any(|p| text.contains(p)) {
        return true;
    }
    let markup = html.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| markup.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NORMAL: &str = r#"<html><body><h1 data-e2e="user-title">alice</h1><p>cats and dogs</p></body></html>"#;

    #[test]
    fn verify_urls_are_challenges() {
        assert!(is_challenge_url("https://www.tiktok.com/verify/?from=tag"));
        assert!(is_challenge_url("https://www.tiktok.com/VERIFY/x"));
        assert!(is_challenge_url("https://www.tiktok.com/api/verify/bot"));
        assert!(!is_challenge_url("https://www.tiktok.com/tag/verify"));
    }

    #[test]
    fn challenge_wording_in_body_prefix() {
        let html = "<body><p>Please check that you are a real person</p></body>";
        assert!(looks_like_challenge("https://www.tiktok.com/tag/x", html));
        assert!(!looks_like_challenge("https://www.tiktok.com/tag/x", NORMAL));
    }

    #[test]
    fn challenge_wording_beyond_window_is_ignored() {
        let filler = "a ".repeat(400);
        let html = format!("<body><p>{}</p><p>unusual traffic</p></body>", filler);
        assert!(!looks_like_challenge("https://www.tiktok.com/tag/x", &html));
    }

    #[test]
    fn captcha_markup_is_a_challenge() {
        let html = r#"<body><div id="cf-chl-bypass"></div></body>"#;
        assert!(looks_like_challenge("https://www.tiktok.com/tag/x", html));
    }

    #[test]
    fn error_wording_and_marker() {
        assert!(looks_like_error_page("<body><p>Something went wrong</p></body>"));
        assert!(looks_like_error_page(r#"<body><div data-e2e="error-page"></div></body>"#));
        assert!(!looks_like_error_page(NORMAL));
    }
}
