//! Pure HTML helpers shared by detection and extraction.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};

lazy_static! {
    // Handle segment of a profile link: `/@handle`, `/@handle/video/1`, `/@handle?lang=en`
    static ref HANDLE_IN_HREF: Regex = Regex::new(r"@([^/?#]+)").unwrap();
    static ref VALID_HANDLE: Regex = Regex::new(r"^[A-Za-z0-9_.]{1,64}$").unwrap();
    static ref VALID_HASHTAG: Regex = Regex::new(r"^[\p{L}\p{N}_]{1,150}$").unwrap();
}

/// Handles are letters, digits, `_` and `.`, so they are safe as a URL path segment.
pub fn is_valid_handle(handle: &str) -> bool {
    VALID_HANDLE.is_match(handle)
}

/// Hashtags are letters and digits in any script plus `_`.
pub fn is_valid_hashtag(hashtag: &str) -> bool {
    VALID_HASHTAG.is_match(hashtag)
}

/// Anchors that point at creator profiles on listing pages.
pub const PROFILE_LINK_SELECTORS: &[&str] = &[
    r#"a[href*="/@"]"#,
    r#"[data-e2e="user-link"]"#,
    r#"[data-e2e="search-card-user-link"]"#,
    r#"[data-e2e="challenge-item-user-card"] a[href*="/@"]"#,
];

/// Parse a display count such as `1.2M`, `15.3K` or `12,345`.
///
/// Unparseable input yields 0.
pub fn parse_count(raw: &str) -> i64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect::<String>()
        .to_uppercase();
    if cleaned.is_empty() {
        return 0;
    }

    let multiplier = match cleaned.chars().last() {
        Some('B') => 1_000_000_000.0,
        Some('M') => 1_000_000.0,
        Some('K') => 1_000.0,
        _ => 1.0,
    };
    let numeric: String = cleaned.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();

    match numeric.parse::<f64>() {
        Ok(value) if value.is_finite() => (value * multiplier).floor() as i64,
        _ => 0,
    }
}

/// Handle from a profile link, without the leading `@`.
pub fn handle_from_href(href: &str) -> Option<String> {
    HANDLE_IN_HREF
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|h| is_valid_handle(h))
}

/// Unique handles linked from the page, in document order.
pub fn extract_link_handles(document: &Html) -> Vec<String> {
    let mut handles: Vec<String> = Vec::new();
    for selector_str in PROFILE_LINK_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in document.select(&selector) {
            let Some(handle) = element.value().attr("href").and_then(handle_from_href) else {
                continue;
            };
            if !handles.contains(&handle) {
                handles.push(handle);
            }
        }
    }
    handles
}

/// Whitespace-collapsed text a user would see in `<body>`.
pub fn visible_text(document: &Html) -> String {
    let body = Selector::parse("body")
        .ok()
        .and_then(|s| document.select(&s).next())
        .unwrap_or_else(|| document.root_element());

    let mut out = String::new();
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .map(|name| matches!(name.as_str(), "script" | "style" | "noscript" | "template"))
            .unwrap_or(false);
        if hidden {
            continue;
        }
        for word in text.split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(word);
        }
    }
    out
}

/// Lowercased first `n` characters.
pub fn lowercase_prefix(text: &str, n: usize) -> String {
    text.chars().take(n).collect::<String>().to_lowercase()
}

/// Collapse runs of whitespace and trim; empty becomes `None`.
pub fn clean_text(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_counts() {
        assert_eq!(parse_count("1.2M"), 1_200_000);
        assert_eq!(parse_count("15.3K"), 15_300);
        assert_eq!(parse_count("2B"), 2_000_000_000);
        assert_eq!(parse_count("999"), 999);
        assert_eq!(parse_count("3.7k"), 3_700);
    }

    #[test]
    fn parses_separated_counts() {
        assert_eq!(parse_count("12,345"), 12_345);
        assert_eq!(parse_count(" 1 024 "), 1_024);
    }

    #[test]
    fn garbage_counts_are_zero() {
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("Followers"), 0);
        assert_eq!(parse_count("K"), 0);
    }

    #[test]
    fn extracts_handle_from_hrefs() {
        assert_eq!(handle_from_href("/@alice").as_deref(), Some("alice"));
        assert_eq!(handle_from_href("https://www.tiktok.com/@bob.smith/video/123").as_deref(), Some("bob.smith"));
        assert_eq!(handle_from_href("/@carol?lang=en").as_deref(), Some("carol"));
        assert_eq!(handle_from_href("/tag/cats"), None);
        assert_eq!(handle_from_href("/@..%2f..%2fadmin"), None);
        assert_eq!(handle_from_href("/@a b"), None);
    }

    #[test]
    fn hashtag_and_handle_charsets() {
        assert!(is_valid_hashtag("cats"));
        assert!(is_valid_hashtag("ねこ_2024"));
        assert!(!is_valid_hashtag("cats/../admin"));
        assert!(!is_valid_hashtag("cats?x=1"));
        assert!(!is_valid_hashtag("two words"));
        assert!(!is_valid_hashtag(""));

        assert!(is_valid_handle("bob.smith_99"));
        assert!(!is_valid_handle("bob/smith"));
        assert!(!is_valid_handle("bob%20"));
        assert!(!is_valid_handle(&"a".repeat(65)));
    }

    #[test]
    fn link_handles_are_unique_and_ordered() {
        let html = Html::parse_document(
            r#"<body>
                <a href="/@zed/video/1">v</a>
                <a href="/@amy">a</a>
                <a href="/@zed">z</a>
                <a href="/tag/other">t</a>
            </body>"#,
        );
        assert_eq!(extract_link_handles(&html), vec!["zed", "amy"]);
    }

    #[test]
    fn visible_text_skips_scripts() {
        let html = Html::parse_document(
            "<html><body><h1>Hello\n  there</h1><script>var verify = 1;</script><p>world</p></body></html>",
        );
        assert_eq!(visible_text(&html), "Hello there world");
    }

    #[test]
    fn lowercase_prefix_counts_chars() {
        assert_eq!(lowercase_prefix("ÄBCdef", 4), "äbcd");
    }
}
