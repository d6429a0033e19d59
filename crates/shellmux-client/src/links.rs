//! Advisory URL detection in shell output.
//!
//! Output is scanned with SGR color sequences stripped. Detection never
//! changes what is written to the surface.

use std::sync::OnceLock;

use regex::Regex;

fn sgr_pattern() -> &'static Regex {
    static SGR: OnceLock<Regex> = OnceLock::new();
    SGR.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid SGR pattern"))
}

fn url_pattern() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r"https?://[^\s\x1b\x07]+").expect("valid URL pattern"))
}

/// URLs mentioned in a chunk of output, in order of appearance.
pub fn detect_urls(output: &str) -> Vec<String> {
    if !output.contains("http") {
        return Vec::new();
    }
    let plain = sgr_pattern().replace_all(output, "");
    url_pattern()
        .find_iter(&plain)
        .map(|m| m.as_str().to_string())
        .collect()
}
