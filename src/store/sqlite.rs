use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{RelayError, Result};
use crate::domain::{
    Contact, Feed, Follow, Mention, PollOption, PollVote, Post, PostDraft, PostKind, PostRef,
    Profile, ProfileUpdate,
};
use crate::store::Store;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.lock()?;

        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|_| RelayError::Database(rusqlite::Error::InvalidQuery))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            RelayError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }
}

impl Store for SqliteStore {
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&StoreTx { conn: &conn })
    }

    fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        // Dropping `tx` without commit rolls back.
        let out = f(&StoreTx { conn: &tx })?;
        tx.commit()?;
        Ok(out)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| s.parse::<DateTime<Utc>>().ok())
}

fn required_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(row
        .get::<_, String>(idx)
        .ok()
        .and_then(|s| parse_datetime(&s))
        .unwrap_or_else(Utc::now))
}

fn optional_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

const FEED_COLUMNS: &str = "id, url, last_successful_fetch_at, created_at";

fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        url: row.get(1)?,
        last_successful_fetch_at: optional_datetime(row, 2)?,
        created_at: required_datetime(row, 3)?,
    })
}

const PROFILE_COLUMNS: &str = "id, feed_url, title, nick, description, avatar, location, \
     birthday, language, pinned, version_hash, last_updated_at, created_at";

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        feed_url: row.get(1)?,
        title: row.get(2)?,
        nick: row.get(3)?,
        description: row.get(4)?,
        avatar: row.get(5)?,
        location: row.get(6)?,
        birthday: row.get(7)?,
        language: row.get(8)?,
        pinned: row.get(9)?,
        version_hash: row.get(10)?,
        last_updated_at: required_datetime(row, 11)?,
        created_at: required_datetime(row, 12)?,
    })
}

const POST_SELECT: &str = "SELECT p.id, p.profile_id, pr.feed_url, p.post_id, p.content, \
     p.language, p.tags, p.client, p.reply_to, p.mood, p.group_name, p.include, p.poll_end, \
     p.kind, p.created_at, p.updated_at \
     FROM posts p JOIN profiles pr ON pr.id = p.profile_id";

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        feed_url: row.get(2)?,
        post_id: row.get(3)?,
        content: row.get(4)?,
        language: row.get(5)?,
        tags: row.get(6)?,
        client: row.get(7)?,
        reply_to: row.get(8)?,
        mood: row.get(9)?,
        group: row.get(10)?,
        include: row.get(11)?,
        poll_end: optional_datetime(row, 12)?,
        kind: row
            .get::<_, String>(13)?
            .parse()
            .unwrap_or(PostKind::Post),
        created_at: required_datetime(row, 14)?,
        updated_at: required_datetime(row, 15)?,
    })
}

/// All entity operations, bound to one connection or open transaction.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    /// Run `f` inside a savepoint. On error everything `f` wrote is undone
    /// while the enclosing transaction stays usable.
    pub fn savepoint<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>,
    {
        self.conn.execute_batch("SAVEPOINT feed_sync")?;
        match f(self) {
            Ok(out) => {
                self.conn.execute_batch("RELEASE feed_sync")?;
                Ok(out)
            }
            Err(e) => {
                self.conn
                    .execute_batch("ROLLBACK TO feed_sync; RELEASE feed_sync")?;
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // Feeds

    /// Register a feed URL; an existing registration keeps its id.
    pub fn insert_feed(&self, url: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO feeds (url, created_at) VALUES (?1, ?2)",
            params![url, Utc::now().to_rfc3339()],
        )?;
        let id = self
            .conn
            .query_row("SELECT id FROM feeds WHERE url = ?1", params![url], |row| {
                row.get(0)
            })?;
        Ok(id)
    }

    pub fn feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let sql = format!("SELECT {} FROM feeds WHERE url = ?1", FEED_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![url], feed_from_row)
            .optional()?)
    }

    pub fn all_feeds(&self) -> Result<Vec<Feed>> {
        let sql = format!("SELECT {} FROM feeds ORDER BY url", FEED_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let feeds = stmt
            .query_map([], feed_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feeds)
    }

    pub fn delete_feed(&self, url: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM feeds WHERE url = ?1", params![url])?;
        Ok(n > 0)
    }

    pub fn mark_fetched(&self, url: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE feeds SET last_successful_fetch_at = ?1 WHERE url = ?2",
            params![at.to_rfc3339(), url],
        )?;
        Ok(())
    }

    pub fn rename_feed(&self, old_url: &str, new_url: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE feeds SET url = ?1 WHERE url = ?2",
            params![new_url, old_url],
        )?;
        Ok(())
    }

    /// Never-fetched feeds (NULL timestamp) are not matched.
    pub fn delete_feeds_fetched_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let stale: Vec<String> = self
            .all_feeds()?
            .into_iter()
            .filter(|f| f.last_successful_fetch_at.is_some_and(|at| at < cutoff))
            .map(|f| f.url)
            .collect();
        for url in &stale {
            self.delete_feed(url)?;
        }
        Ok(stale)
    }

    // Profiles

    pub fn profile_by_url(&self, feed_url: &str) -> Result<Option<Profile>> {
        let sql = format!("SELECT {} FROM profiles WHERE feed_url = ?1", PROFILE_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![feed_url], profile_from_row)
            .optional()?)
    }

    pub fn insert_profile(&self, feed_url: &str, update: &ProfileUpdate) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO profiles (feed_url, title, nick, description, avatar, location, birthday,
                                   language, pinned, version_hash, last_updated_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                feed_url,
                update.title,
                update.nick,
                update.description,
                update.avatar,
                update.location,
                update.birthday,
                update.language,
                update.pinned,
                update.version_hash,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_profile(&self, id: i64, update: &ProfileUpdate) -> Result<()> {
        self.conn.execute(
            "UPDATE profiles SET title = ?1, nick = ?2, description = ?3, avatar = ?4,
                    location = ?5, birthday = ?6, language = ?7, pinned = ?8,
                    version_hash = ?9, last_updated_at = ?10
             WHERE id = ?11",
            params![
                update.title,
                update.nick,
                update.description,
                update.avatar,
                update.location,
                update.birthday,
                update.language,
                update.pinned,
                update.version_hash,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    pub fn rename_profile(&self, id: i64, new_url: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE profiles SET feed_url = ?1 WHERE id = ?2",
            params![new_url, id],
        )?;
        Ok(())
    }

    /// Cascades to links, contacts, follows, posts and their children.
    pub fn delete_profile(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn replace_links(&self, profile_id: i64, links: &[String]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM profile_links WHERE profile_id = ?1",
            params![profile_id],
        )?;
        let mut stmt = self
            .conn
            .prepare("INSERT OR IGNORE INTO profile_links (profile_id, url) VALUES (?1, ?2)")?;
        for link in links {
            stmt.execute(params![profile_id, link])?;
        }
        Ok(())
    }

    pub fn links(&self, profile_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM profile_links WHERE profile_id = ?1 ORDER BY id")?;
        let links = stmt
            .query_map(params![profile_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(links)
    }

    pub fn replace_contacts(&self, profile_id: i64, contacts: &[Contact]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM profile_contacts WHERE profile_id = ?1",
            params![profile_id],
        )?;
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO profile_contacts (profile_id, contact_type, contact_value)
             VALUES (?1, ?2, ?3)",
        )?;
        for contact in contacts {
            stmt.execute(params![
                profile_id,
                contact.contact_type,
                contact.contact_value
            ])?;
        }
        Ok(())
    }

    pub fn contacts(&self, profile_id: i64) -> Result<Vec<Contact>> {
        let mut stmt = self.conn.prepare(
            "SELECT contact_type, contact_value FROM profile_contacts
             WHERE profile_id = ?1 ORDER BY id",
        )?;
        let contacts = stmt
            .query_map(params![profile_id], |row| {
                Ok(Contact {
                    contact_type: row.get(0)?,
                    contact_value: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    // Follows

    pub fn replace_follows(&self, follower_id: i64, edges: &[Follow]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1",
            params![follower_id],
        )?;
        let now = Utc::now().to_rfc3339();
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO follows (follower_id, followed_id, nickname, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for edge in edges.iter().filter(|e| e.follower_id == follower_id) {
            stmt.execute(params![follower_id, edge.followed_id, edge.nickname, now])?;
        }
        Ok(())
    }

    pub fn follows_of(&self, follower_id: i64) -> Result<Vec<Follow>> {
        let mut stmt = self.conn.prepare(
            "SELECT follower_id, followed_id, nickname FROM follows
             WHERE follower_id = ?1 ORDER BY id",
        )?;
        let follows = stmt
            .query_map(params![follower_id], |row| {
                Ok(Follow {
                    follower_id: row.get(0)?,
                    followed_id: row.get(1)?,
                    nickname: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(follows)
    }

    /// Edges where the profile is either side, with their row ids.
    pub fn follows_involving(&self, profile_id: i64) -> Result<Vec<(i64, Follow)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, follower_id, followed_id, nickname FROM follows
             WHERE follower_id = ?1 OR followed_id = ?1 ORDER BY id",
        )?;
        let follows = stmt
            .query_map(params![profile_id], |row| {
                Ok((
                    row.get(0)?,
                    Follow {
                        follower_id: row.get(1)?,
                        followed_id: row.get(2)?,
                        nickname: row.get(3)?,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(follows)
    }

    /// Fails with a constraint violation when the new edge already exists.
    pub fn move_follow(&self, row_id: i64, follower_id: i64, followed_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE follows SET follower_id = ?1, followed_id = ?2 WHERE id = ?3",
            params![follower_id, followed_id, row_id],
        )?;
        Ok(())
    }

    pub fn delete_follow(&self, row_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM follows WHERE id = ?1", params![row_id])?;
        Ok(())
    }

    // Posts

    pub fn post_by_ref(&self, reference: &PostRef) -> Result<Option<Post>> {
        let sql = format!("{} WHERE pr.feed_url = ?1 AND p.post_id = ?2", POST_SELECT);
        Ok(self
            .conn
            .query_row(
                &sql,
                params![reference.feed_url, reference.post_id],
                post_from_row,
            )
            .optional()?)
    }

    pub fn post_in_profile(&self, profile_id: i64, post_id: &str) -> Result<Option<Post>> {
        let sql = format!("{} WHERE p.profile_id = ?1 AND p.post_id = ?2", POST_SELECT);
        Ok(self
            .conn
            .query_row(&sql, params![profile_id, post_id], post_from_row)
            .optional()?)
    }

    pub fn posts_by_profile(&self, profile_id: i64) -> Result<Vec<Post>> {
        let sql = format!(
            "{} WHERE p.profile_id = ?1 ORDER BY p.post_id DESC",
            POST_SELECT
        );
        self.query_posts(&sql, params![profile_id])
    }

    /// Posts whose `reply_to` is exactly `reference`.
    pub fn posts_replying_to(&self, reference: &str) -> Result<Vec<Post>> {
        let sql = format!(
            "{} WHERE p.reply_to = ?1 ORDER BY p.post_id DESC",
            POST_SELECT
        );
        self.query_posts(&sql, params![reference])
    }

    /// Posts replying to any post of `feed_url`.
    pub fn posts_replying_to_feed(&self, feed_url: &str) -> Result<Vec<Post>> {
        let sql = format!(
            "{} WHERE substr(p.reply_to, 1, length(?1) + 1) = ?1 || '#'
             ORDER BY p.post_id DESC",
            POST_SELECT
        );
        self.query_posts(&sql, params![feed_url])
    }

    pub fn posts_including(&self, reference: &str) -> Result<Vec<Post>> {
        let sql = format!(
            "{} WHERE p.include = ?1 ORDER BY p.post_id DESC",
            POST_SELECT
        );
        self.query_posts(&sql, params![reference])
    }

    /// Posts carrying a mention of the given profile.
    pub fn posts_mentioning(&self, profile_id: i64) -> Result<Vec<Post>> {
        let sql = format!(
            "{} JOIN mentions m ON m.post_id = p.id
             WHERE m.mentioned_profile_id = ?1 ORDER BY p.post_id DESC",
            POST_SELECT
        );
        self.query_posts(&sql, params![profile_id])
    }

    fn query_posts(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Post>> {
        let mut stmt = self.conn.prepare(sql)?;
        let posts = stmt
            .query_map(params, post_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    pub fn insert_post(&self, profile_id: i64, draft: &PostDraft) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO posts (profile_id, post_id, content, language, tags, client, reply_to,
                                mood, group_name, include, poll_end, kind, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                profile_id,
                draft.post_id,
                draft.content,
                draft.language,
                draft.tags,
                draft.client,
                draft.reply_to,
                draft.mood,
                draft.group,
                draft.include,
                draft.poll_end.map(|dt| dt.to_rfc3339()),
                draft.kind.as_str(),
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_post(&self, id: i64, draft: &PostDraft) -> Result<()> {
        self.conn.execute(
            "UPDATE posts SET content = ?1, language = ?2, tags = ?3, client = ?4,
                    reply_to = ?5, mood = ?6, group_name = ?7, include = ?8,
                    poll_end = ?9, kind = ?10, updated_at = ?11
             WHERE id = ?12",
            params![
                draft.content,
                draft.language,
                draft.tags,
                draft.client,
                draft.reply_to,
                draft.mood,
                draft.group,
                draft.include,
                draft.poll_end.map(|dt| dt.to_rfc3339()),
                draft.kind.as_str(),
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    /// Hard delete; poll options, votes and mentions cascade.
    pub fn delete_post(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Fails with a constraint violation when the target profile already owns the post id.
    pub fn move_post(&self, id: i64, profile_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE posts SET profile_id = ?1 WHERE id = ?2",
            params![profile_id, id],
        )?;
        Ok(())
    }

    // Polls

    pub fn poll_options(&self, post_id: i64) -> Result<Vec<PollOption>> {
        let mut stmt = self.conn.prepare(
            "SELECT post_id, option_text, position FROM poll_options
             WHERE post_id = ?1 ORDER BY position",
        )?;
        let options = stmt
            .query_map(params![post_id], |row| {
                Ok(PollOption {
                    post_id: row.get(0)?,
                    text: row.get(1)?,
                    order: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(options)
    }

    pub fn replace_poll_options(&self, post_id: i64, options: &[String]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM poll_options WHERE post_id = ?1",
            params![post_id],
        )?;
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO poll_options (post_id, option_text, position)
             VALUES (?1, ?2, ?3)",
        )?;
        for (position, text) in options.iter().enumerate() {
            stmt.execute(params![post_id, text, position as i64])?;
        }
        Ok(())
    }

    pub fn vote_cast_by(&self, vote_post_id: i64) -> Result<Option<PollVote>> {
        Ok(self
            .conn
            .query_row(
                "SELECT vote_post_id, poll_post_id, selected_option FROM poll_votes
                 WHERE vote_post_id = ?1",
                params![vote_post_id],
                |row| {
                    Ok(PollVote {
                        vote_post_id: row.get(0)?,
                        poll_post_id: row.get(1)?,
                        selected_option: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn votes_for_poll(&self, poll_post_id: i64) -> Result<Vec<PollVote>> {
        let mut stmt = self.conn.prepare(
            "SELECT vote_post_id, poll_post_id, selected_option FROM poll_votes
             WHERE poll_post_id = ?1 ORDER BY id",
        )?;
        let votes = stmt
            .query_map(params![poll_post_id], |row| {
                Ok(PollVote {
                    vote_post_id: row.get(0)?,
                    poll_post_id: row.get(1)?,
                    selected_option: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(votes)
    }

    /// A post casts at most one vote; a changed target replaces the old vote.
    pub fn upsert_poll_vote(&self, vote: &PollVote) -> Result<()> {
        self.conn.execute(
            "DELETE FROM poll_votes WHERE vote_post_id = ?1 AND poll_post_id != ?2",
            params![vote.vote_post_id, vote.poll_post_id],
        )?;
        self.conn.execute(
            "INSERT INTO poll_votes (vote_post_id, poll_post_id, selected_option, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (vote_post_id, poll_post_id)
             DO UPDATE SET selected_option = excluded.selected_option",
            params![
                vote.vote_post_id,
                vote.poll_post_id,
                vote.selected_option,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn delete_votes_cast_by(&self, vote_post_id: i64) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM poll_votes WHERE vote_post_id = ?1",
            params![vote_post_id],
        )?)
    }

    /// Move votes targeting `from` onto `to`; votes that would collide are dropped.
    pub fn repoint_poll_votes(&self, from: i64, to: i64) -> Result<usize> {
        let moved = self.conn.execute(
            "UPDATE OR IGNORE poll_votes SET poll_post_id = ?1 WHERE poll_post_id = ?2",
            params![to, from],
        )?;
        self.conn.execute(
            "DELETE FROM poll_votes WHERE poll_post_id = ?1",
            params![from],
        )?;
        Ok(moved)
    }

    // Mentions

    /// Returns false when the mention was already recorded.
    pub fn insert_mention(&self, mention: &Mention) -> Result<bool> {
        let n = self.conn.execute(
            "INSERT OR IGNORE INTO mentions (post_id, mentioned_profile_id, nickname, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                mention.post_id,
                mention.mentioned_profile_id,
                mention.nickname,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(n > 0)
    }

    /// Bulk re-target mentions; rows that would duplicate an existing mention
    /// on the same post are removed. Returns (moved, dropped).
    pub fn repoint_mentions(&self, from: i64, to: i64) -> Result<(usize, usize)> {
        let moved = self.conn.execute(
            "UPDATE OR IGNORE mentions SET mentioned_profile_id = ?1
             WHERE mentioned_profile_id = ?2",
            params![to, from],
        )?;
        let dropped = self.conn.execute(
            "DELETE FROM mentions WHERE mentioned_profile_id = ?1",
            params![from],
        )?;
        Ok((moved, dropped))
    }
}
