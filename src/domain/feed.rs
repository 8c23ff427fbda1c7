use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub last_successful_fetch_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    pub fn new(url: String) -> Self {
        Self {
            id: 0,
            url,
            last_successful_fetch_at: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the reaper may delete this feed.
    ///
    /// Feeds that were never fetched successfully are kept so that legacy
    /// registrations are not destroyed.
    pub fn is_stale(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match self.last_successful_fetch_at {
            Some(at) => at < now - retention,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_fetched_feed_is_not_stale() {
        let feed = Feed::new("https://example.com/social.org".into());
        assert!(!feed.is_stale(Utc::now(), Duration::days(3)));
    }

    #[test]
    fn test_old_fetch_is_stale() {
        let mut feed = Feed::new("https://example.com/social.org".into());
        let now = Utc::now();
        feed.last_successful_fetch_at = Some(now - Duration::days(4));
        assert!(feed.is_stale(now, Duration::days(3)));

        feed.last_successful_fetch_at = Some(now - Duration::days(2));
        assert!(!feed.is_stale(now, Duration::days(3)));
    }
}
