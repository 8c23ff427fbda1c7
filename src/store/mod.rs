pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::app::{RelayError, Result};
use crate::domain::{Feed, Post, PostRef, Profile};

pub use sqlite::{SqliteStore, StoreTx};

/// Unit-of-work access to relay state.
///
/// Every entity operation lives on [`StoreTx`]; `write` wraps the closure in
/// a single transaction that commits only when the closure returns `Ok`.
pub trait Store: Send + Sync {
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>;

    fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>;

    // Feed operations
    fn add_feed(&self, url: &str) -> Result<i64> {
        self.write(|tx| tx.insert_feed(url))
    }

    fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        self.read(|tx| tx.feed_by_url(url))
    }

    fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        self.read(|tx| tx.all_feeds())
    }

    fn delete_feed(&self, url: &str) -> Result<bool> {
        self.write(|tx| tx.delete_feed(url))
    }

    /// Delete feeds last fetched successfully before `cutoff`, returning their URLs.
    fn delete_stale_feeds(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        self.write(|tx| tx.delete_feeds_fetched_before(cutoff))
    }

    // Read-side lookups
    fn get_profile(&self, feed_url: &str) -> Result<Option<Profile>> {
        self.read(|tx| tx.profile_by_url(feed_url))
    }

    fn get_post(&self, reference: &PostRef) -> Result<Option<Post>> {
        self.read(|tx| tx.post_by_ref(reference))
    }
}

/// True when `err` is a SQLite UNIQUE/FOREIGN KEY violation.
pub fn is_constraint_violation(err: &RelayError) -> bool {
    matches!(
        err,
        RelayError::Database(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
