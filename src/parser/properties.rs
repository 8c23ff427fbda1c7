use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

// Matched one line at a time, so an empty value can never reach into the
// following `:KEY:` line.
static PROPERTY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*:([^:\s]+):(.*)$").expect("valid property regex"));

/// A `:PROPERTIES:` ... `:END:` drawer found at the top of a post section.
pub(crate) struct Drawer<'a> {
    pub properties: BTreeMap<String, String>,
    /// Lines following the `:END:` marker.
    pub rest: &'a [&'a str],
}

/// Split a post section into its drawer and the remaining body lines.
///
/// Returns `None` when the section does not open with a drawer or the drawer
/// is never closed; the caller then treats every line as body text.
pub(crate) fn split_drawer<'a>(lines: &'a [&'a str]) -> Option<Drawer<'a>> {
    let start = lines.iter().position(|l| !l.trim().is_empty())?;
    if !lines[start].trim().eq_ignore_ascii_case(":PROPERTIES:") {
        return None;
    }

    let end_offset = lines[start + 1..]
        .iter()
        .position(|l| l.trim().eq_ignore_ascii_case(":END:"))?;
    let end = start + 1 + end_offset;

    Some(Drawer {
        properties: parse_properties(&lines[start + 1..end]),
        rest: &lines[end + 1..],
    })
}

/// Collect `:KEY: value` lines. Keys are lower-cased; empty values are not
/// captured; a repeated key keeps its last value.
pub(crate) fn parse_properties(lines: &[&str]) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for line in lines {
        let Some(caps) = PROPERTY_RE.captures(line) else {
            continue;
        };
        let key = caps[1].trim().to_lowercase();
        let value = caps[2].trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        properties.insert(key, value.to_string());
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_value_does_not_swallow_next_line() {
        let props = parse_properties(&[":MOOD:", ":POLL_OPTION: X"]);
        assert!(!props.contains_key("mood"));
        assert_eq!(props.get("poll_option").map(String::as_str), Some("X"));
    }

    #[test]
    fn test_whitespace_only_value_is_dropped() {
        let props = parse_properties(&[":MOOD:    ", ":LANG: en"]);
        assert!(!props.contains_key("mood"));
        assert_eq!(props["lang"], "en");
    }

    #[test]
    fn test_value_with_colons_is_kept_whole() {
        let props = parse_properties(&[
            ":REPLY_TO: https://bob.example.com/social.org#2025-01-19T10:00:00+0100",
        ]);
        assert_eq!(
            props["reply_to"],
            "https://bob.example.com/social.org#2025-01-19T10:00:00+0100"
        );
    }

    #[test]
    fn test_split_drawer_requires_end() {
        let lines = [":PROPERTIES:", ":ID: 2025-01-01T00:00:00+0000", "text"];
        assert!(split_drawer(&lines).is_none());
    }

    #[test]
    fn test_split_drawer_returns_body() {
        let lines = [
            "",
            ":PROPERTIES:",
            ":ID: 2025-01-01T00:00:00+0000",
            ":END:",
            "",
            "Hello",
        ];
        let drawer = split_drawer(&lines).unwrap();
        assert_eq!(drawer.properties["id"], "2025-01-01T00:00:00+0000");
        assert_eq!(drawer.rest, &["", "Hello"]);
    }
}
