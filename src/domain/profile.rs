use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: i64,
    pub feed_url: String,
    pub title: String,
    pub nick: String,
    pub description: String,
    pub avatar: String,
    pub location: String,
    pub birthday: String,
    pub language: String,
    pub pinned: String,
    pub version_hash: String,
    pub last_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn display_name(&self) -> &str {
        if !self.nick.is_empty() {
            &self.nick
        } else if !self.title.is_empty() {
            &self.title
        } else {
            &self.feed_url
        }
    }
}

/// Single-valued profile fields as written by a sync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub title: String,
    pub nick: String,
    pub description: String,
    pub avatar: String,
    pub location: String,
    pub birthday: String,
    pub language: String,
    pub pinned: String,
    pub version_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub contact_type: String,
    pub contact_value: String,
}

impl Contact {
    /// Split a CONTACT value like `mailto:me@example.com` at the first ':'.
    pub fn parse(raw: &str) -> Option<Self> {
        let (kind, value) = raw.trim().split_once(':')?;
        let (kind, value) = (kind.trim(), value.trim());
        if kind.is_empty() || value.is_empty() {
            return None;
        }
        Some(Self {
            contact_type: kind.to_string(),
            contact_value: value.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Follow {
    pub follower_id: i64,
    pub followed_id: i64,
    pub nickname: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_parse() {
        let c = Contact::parse("mailto:meow@terron-cat.meow").unwrap();
        assert_eq!(c.contact_type, "mailto");
        assert_eq!(c.contact_value, "meow@terron-cat.meow");

        let c = Contact::parse("https://mastodon.social/@terron_cat").unwrap();
        assert_eq!(c.contact_type, "https");
        assert_eq!(c.contact_value, "//mastodon.social/@terron_cat");
    }

    #[test]
    fn test_contact_without_separator_is_rejected() {
        assert!(Contact::parse("just-some-text").is_none());
        assert!(Contact::parse("xmpp:").is_none());
    }
}
