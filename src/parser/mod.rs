//! Org Social document parser.
//!
//! Turns the raw text of a `social.org` file into [`Document`]: profile
//! metadata from `#+KEY: value` lines and the ordered list of posts found
//! under the `* Posts` heading. Parsing never fails; malformed sections just
//! yield fewer posts.
//!
//! ```text
//! #+TITLE: Terron's Daily Adventures
//! #+NICK: terron_cat
//!
//! * Posts
//! ** 2025-01-15T09:30:00+0100
//! :PROPERTIES:
//! :LANG: en
//! :END:
//!
//! Hello [[org-social:https://bob.example.com/social.org][bob]]!
//! ```

mod properties;
mod render;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static METADATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#\+([A-Za-z_]+):(.*)$").expect("valid metadata regex"));

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[org-social:([^\]]+)\]\[([^\]]+)\]\]").expect("valid mention regex")
});

static POLL_OPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*-[ \t]*\[[ \t]*\][ \t]*(.+)$").expect("valid poll option regex")
});

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?$")
        .expect("valid timestamp regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub nick: String,
    pub description: String,
    pub avatar: String,
    pub location: String,
    pub birthday: String,
    pub language: String,
    pub pinned: String,
    pub links: Vec<String>,
    pub contacts: Vec<String>,
    pub follows: Vec<FollowEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowEntry {
    pub url: String,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionLink {
    pub url: String,
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedPost {
    pub id: String,
    pub content: String,
    /// Drawer properties with lower-cased keys. Always holds `id`.
    pub properties: BTreeMap<String, String>,
    pub mentions: Vec<MentionLink>,
    pub poll_options: Vec<String>,
}

impl ParsedPost {
    /// Non-empty property value by lower-case key.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub metadata: Metadata,
    pub posts: Vec<ParsedPost>,
}

impl Document {
    /// Whether this looks like an Org Social file at all.
    pub fn is_org_social(&self) -> bool {
        !self.metadata.nick.is_empty() || !self.metadata.title.is_empty() || !self.posts.is_empty()
    }

    pub fn to_org(&self) -> String {
        render::render(self)
    }
}

/// Parse raw bytes as UTF-8.
///
/// Decoding is always UTF-8 regardless of what the transport declared; a
/// leading BOM is dropped and invalid sequences are replaced.
pub fn parse_bytes(body: &[u8]) -> Document {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    parse(&String::from_utf8_lossy(body))
}

pub fn parse(text: &str) -> Document {
    let lines: Vec<&str> = text.lines().collect();
    let mut doc = Document::default();

    let posts_start = lines
        .iter()
        .position(|l| matches!(heading(l), Some((1, title)) if title.eq_ignore_ascii_case("posts")));

    let header = &lines[..posts_start.unwrap_or(lines.len())];
    for line in header {
        if let Some(caps) = METADATA_RE.captures(line) {
            apply_metadata(&mut doc.metadata, &caps[1], caps[2].trim());
        }
    }

    if let Some(start) = posts_start {
        let section_end = lines[start + 1..]
            .iter()
            .position(|l| matches!(heading(l), Some((1, _))))
            .map(|offset| start + 1 + offset)
            .unwrap_or(lines.len());

        for (marker, body) in split_sections(&lines[start + 1..section_end]) {
            if let Some(post) = parse_post(marker, body) {
                doc.posts.push(post);
            }
        }
    }

    doc
}

/// Org heading level and title, e.g. `** foo` -> `(2, "foo")`.
fn heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '*').count();
    if level == 0 {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(|c: char| c == ' ' || c == '\t') {
        return None;
    }
    Some((level, rest.trim()))
}

fn apply_metadata(meta: &mut Metadata, key: &str, value: &str) {
    if value.is_empty() {
        return;
    }

    let single = match key.to_ascii_uppercase().as_str() {
        "TITLE" => &mut meta.title,
        "NICK" => &mut meta.nick,
        "DESCRIPTION" => &mut meta.description,
        "AVATAR" => &mut meta.avatar,
        "LOCATION" => &mut meta.location,
        "BIRTHDAY" => &mut meta.birthday,
        "LANGUAGE" => &mut meta.language,
        "PINNED" => &mut meta.pinned,
        "LINK" => {
            meta.links.push(value.to_string());
            return;
        }
        "CONTACT" => {
            meta.contacts.push(value.to_string());
            return;
        }
        "FOLLOW" => {
            let parts: Vec<&str> = value.split_whitespace().collect();
            let entry = match parts.as_slice() {
                [url] => FollowEntry {
                    url: url.to_string(),
                    nickname: None,
                },
                [nickname, url, ..] => FollowEntry {
                    url: url.to_string(),
                    nickname: Some(nickname.to_string()),
                },
                [] => return,
            };
            meta.follows.push(entry);
            return;
        }
        _ => return,
    };

    // First occurrence wins for single-valued keys.
    if single.is_empty() {
        *single = value.to_string();
    }
}

/// Split the posts area at level-2 markers. Deeper headings stay in the body.
fn split_sections<'a>(lines: &'a [&'a str]) -> Vec<(&'a str, &'a [&'a str])> {
    let markers: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| matches!(heading(l), Some((2, _))))
        .map(|(i, _)| i)
        .collect();

    markers
        .iter()
        .enumerate()
        .map(|(n, &i)| {
            let end = markers.get(n + 1).copied().unwrap_or(lines.len());
            let marker = heading(lines[i]).map(|(_, t)| t).unwrap_or("");
            (marker, &lines[i + 1..end])
        })
        .collect()
}

fn parse_post(marker: &str, lines: &[&str]) -> Option<ParsedPost> {
    let (mut props, body) = match properties::split_drawer(lines) {
        Some(drawer) => (drawer.properties, drawer.rest),
        None => (BTreeMap::new(), lines),
    };

    let id = if TIMESTAMP_RE.is_match(marker) {
        marker.to_string()
    } else {
        props.get("id").cloned().unwrap_or_default()
    };
    if id.is_empty() {
        return None;
    }
    props.insert("id".to_string(), id.clone());

    let content = body.join("\n").trim().to_string();

    let mentions = MENTION_RE
        .captures_iter(&content)
        .map(|c| MentionLink {
            url: c[1].trim().to_string(),
            nickname: c[2].trim().to_string(),
        })
        .collect();

    let poll_options = POLL_OPTION_RE
        .captures_iter(&content)
        .map(|c| c[1].trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();

    Some(ParsedPost {
        id,
        content,
        properties: props,
        mentions,
        poll_options,
    })
}
