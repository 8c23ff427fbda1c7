//! Interaction notifications fanned out per recipient feed.
//!
//! The sync engine never publishes directly: it pushes [`Outbound`] events
//! onto a bounded queue and the [`Dispatcher`](dispatcher::Dispatcher) task
//! forwards them to the [`NotificationBus`].

pub mod bus;
pub mod dispatcher;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use bus::{NotificationBus, Subscription};
pub use dispatcher::{spawn_dispatcher, Dispatcher, DispatcherHandle};

/// An interaction event. Every reference is a canonical `{feed}#{id}` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    Mention {
        post: String,
    },
    Reply {
        post: String,
        parent: String,
    },
    Reaction {
        post: String,
        emoji: String,
        parent: String,
    },
    Boost {
        post: String,
        boosted: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Mention { .. } => "mention",
            Notification::Reply { .. } => "reply",
            Notification::Reaction { .. } => "reaction",
            Notification::Boost { .. } => "boost",
        }
    }
}

/// A notification addressed to the feed that should receive it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub recipient: String,
    pub notification: Notification,
}

/// One item of a subscriber's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected { feed_url: String },
    Notification(Notification),
    Heartbeat { timestamp: DateTime<Utc> },
}

impl StreamEvent {
    /// Render as a server-sent-events frame.
    pub fn to_sse_frame(&self) -> String {
        let (name, data) = match self {
            StreamEvent::Connected { feed_url } => (
                "connected",
                serde_json::json!({ "feed": feed_url, "status": "connected" }),
            ),
            StreamEvent::Notification(n) => (
                "notification",
                serde_json::to_value(n).unwrap_or(serde_json::Value::Null),
            ),
            StreamEvent::Heartbeat { timestamp } => (
                "heartbeat",
                serde_json::json!({ "status": "alive", "timestamp": timestamp.timestamp() }),
            ),
        };
        format!("event: {}\ndata: {}\n\n", name, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_json_shape() {
        let n = Notification::Reaction {
            post: "https://b.org/social.org#2".into(),
            emoji: "❤".into(),
            parent: "https://a.org/social.org#1".into(),
        };
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["type"], "reaction");
        assert_eq!(value["emoji"], "❤");
        assert_eq!(value["parent"], "https://a.org/social.org#1");

        let mention = serde_json::to_value(Notification::Mention {
            post: "https://b.org/social.org#2".into(),
        })
        .unwrap();
        assert_eq!(
            mention,
            serde_json::json!({ "type": "mention", "post": "https://b.org/social.org#2" })
        );
    }

    #[test]
    fn test_sse_frames() {
        let frame = StreamEvent::Notification(Notification::Boost {
            post: "https://b.org/social.org#2".into(),
            boosted: "https://a.org/social.org#1".into(),
        })
        .to_sse_frame();
        assert!(frame.starts_with("event: notification\ndata: {"));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains("\"type\":\"boost\""));

        let frame = StreamEvent::Connected {
            feed_url: "https://a.org/social.org".into(),
        }
        .to_sse_frame();
        assert!(frame.starts_with("event: connected\n"));
        assert!(frame.contains("\"status\":\"connected\""));
    }
}
