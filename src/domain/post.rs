use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::RelayError;

/// Canonical federation-wide identifier of a post: `{feed_url}#{post_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostRef {
    pub feed_url: String,
    pub post_id: String,
}

impl PostRef {
    pub fn new(feed_url: impl Into<String>, post_id: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            post_id: post_id.into(),
        }
    }

    /// Lenient parse used on opaque `reply_to`/`include` values.
    pub fn parse(raw: &str) -> Option<Self> {
        let (feed_url, post_id) = raw.trim().split_once('#')?;
        if feed_url.is_empty() || post_id.is_empty() {
            return None;
        }
        Some(Self::new(feed_url, post_id))
    }
}

impl fmt::Display for PostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.feed_url, self.post_id)
    }
}

impl FromStr for PostRef {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| RelayError::InvalidPostRef(s.to_string()))
    }
}

/// How a post relates to other posts, decided once at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Post,
    Reply,
    Reaction,
    Boost,
    PollVote,
}

impl PostKind {
    /// Precedence: poll vote, reaction, boost, reply, plain post.
    pub fn classify(
        content: &str,
        reply_to: Option<&str>,
        mood: &str,
        include: Option<&str>,
        is_poll_vote: bool,
    ) -> Self {
        let replies = reply_to.is_some_and(|r| !r.trim().is_empty());
        if is_poll_vote {
            PostKind::PollVote
        } else if replies && !mood.trim().is_empty() && content.trim().is_empty() {
            PostKind::Reaction
        } else if include.is_some_and(|i| !i.trim().is_empty()) {
            PostKind::Boost
        } else if replies {
            PostKind::Reply
        } else {
            PostKind::Post
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PostKind::Post => "post",
            PostKind::Reply => "reply",
            PostKind::Reaction => "reaction",
            PostKind::Boost => "boost",
            PostKind::PollVote => "poll_vote",
        }
    }
}

impl FromStr for PostKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(PostKind::Post),
            "reply" => Ok(PostKind::Reply),
            "reaction" => Ok(PostKind::Reaction),
            "boost" => Ok(PostKind::Boost),
            "poll_vote" => Ok(PostKind::PollVote),
            other => Err(RelayError::Other(format!("Unknown post kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: i64,
    pub profile_id: i64,
    pub feed_url: String,
    pub post_id: String,
    pub content: String,
    pub language: String,
    pub tags: String,
    pub client: String,
    pub reply_to: Option<String>,
    pub mood: String,
    pub group: String,
    pub include: Option<String>,
    pub poll_end: Option<DateTime<Utc>>,
    pub kind: PostKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn reference(&self) -> PostRef {
        PostRef::new(self.feed_url.clone(), self.post_id.clone())
    }

    pub fn is_poll(&self) -> bool {
        self.poll_end.is_some()
    }

    /// Whether the stored row already holds exactly these values.
    pub fn matches(&self, draft: &PostDraft) -> bool {
        self.content == draft.content
            && self.language == draft.language
            && self.tags == draft.tags
            && self.client == draft.client
            && self.reply_to == draft.reply_to
            && self.mood == draft.mood
            && self.group == draft.group
            && self.include == draft.include
            && self.poll_end == draft.poll_end
            && self.kind == draft.kind
    }
}

/// The mutable fields of a post as produced by one parse.
#[derive(Debug, Clone, PartialEq)]
pub struct PostDraft {
    pub post_id: String,
    pub content: String,
    pub language: String,
    pub tags: String,
    pub client: String,
    pub reply_to: Option<String>,
    pub mood: String,
    pub group: String,
    pub include: Option<String>,
    pub poll_end: Option<DateTime<Utc>>,
    pub kind: PostKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_ref_round_trip() {
        let r: PostRef = "https://alice.com/social.org#2024-01-01T10:00:00+0000"
            .parse()
            .unwrap();
        assert_eq!(r.feed_url, "https://alice.com/social.org");
        assert_eq!(r.post_id, "2024-01-01T10:00:00+0000");
        assert_eq!(
            r.to_string(),
            "https://alice.com/social.org#2024-01-01T10:00:00+0000"
        );
    }

    #[test]
    fn test_post_ref_rejects_missing_parts() {
        assert!("https://alice.com/social.org".parse::<PostRef>().is_err());
        assert!("#2024-01-01T10:00:00+0000".parse::<PostRef>().is_err());
        assert!("https://alice.com/social.org#".parse::<PostRef>().is_err());
    }

    #[test]
    fn test_classify_reaction() {
        let kind = PostKind::classify("", Some("https://a.org#1"), "❤", None, false);
        assert_eq!(kind, PostKind::Reaction);
    }

    #[test]
    fn test_classify_reply_with_mood_and_content() {
        let kind = PostKind::classify("Agreed!", Some("https://a.org#1"), "👍", None, false);
        assert_eq!(kind, PostKind::Reply);
    }

    #[test]
    fn test_classify_poll_vote_wins() {
        let kind = PostKind::classify("", Some("https://a.org#1"), "❤", None, true);
        assert_eq!(kind, PostKind::PollVote);
    }

    #[test]
    fn test_classify_boost_and_plain() {
        assert_eq!(
            PostKind::classify("", None, "", Some("https://a.org#1"), false),
            PostKind::Boost
        );
        assert_eq!(PostKind::classify("hi", None, "", None, false), PostKind::Post);
        assert_eq!(
            PostKind::classify("hi", Some("   "), "", None, false),
            PostKind::Post
        );
    }

    #[test]
    fn test_kind_string_round_trip() {
        for kind in [
            PostKind::Post,
            PostKind::Reply,
            PostKind::Reaction,
            PostKind::Boost,
            PostKind::PollVote,
        ] {
            assert_eq!(kind.as_str().parse::<PostKind>().unwrap(), kind);
        }
    }
}
