//! Read-side views over the store, cached per sync cycle.
//!
//! Every view is computed inside one read transaction and stored in the
//! [`CacheCoordinator`] under a key naming the query, so readers see either
//! the state before a cycle or the state after it. Each view comes back
//! with the [`CacheSnapshot`](crate::cache::CacheSnapshot) it was read under.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::app::{RelayError, Result};
use crate::cache::{CacheCoordinator, Cached};
use crate::domain::{Post, PostKind, PostRef};
use crate::notify::Notification;
use crate::store::{SqliteStore, Store, StoreTx};
use crate::thread::{self, Interactions, ReplyNode, Thread, MAX_DEPTH};

const NOTIFICATION_TYPES: [&str; 3] = ["mention", "reaction", "reply"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepliesView {
    pub data: Vec<ReplyNode>,
    pub meta: RepliesMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepliesMeta {
    pub parent: String,
    /// Short digest of the root's last update and the number of replies.
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionsView {
    pub post: String,
    #[serde(flatten)]
    pub interactions: Interactions,
    #[serde(rename = "parentChain")]
    pub parent_chain: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationCounts {
    pub mentions: usize,
    pub reactions: usize,
    pub replies: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationsView {
    pub feed: String,
    pub data: Vec<Notification>,
    /// Counts over all types, before any type filter.
    pub counts: NotificationCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionTally {
    pub option: String,
    pub votes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSummary {
    pub id: String,
    pub post_id: String,
    pub content: String,
    pub poll_end: DateTime<Utc>,
    pub is_active: bool,
    pub options: Vec<OptionTally>,
    pub total_votes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollsView {
    pub feed: String,
    pub data: Vec<PollSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadsView {
    pub feed: String,
    pub data: Vec<Thread>,
}

/// Query entry points used by the CLI.
pub struct Views {
    store: Arc<SqliteStore>,
    cache: Arc<CacheCoordinator>,
}

impl Views {
    pub fn new(store: Arc<SqliteStore>, cache: Arc<CacheCoordinator>) -> Self {
        Self { store, cache }
    }

    /// Reply tree below a post, with reactions grouped as moods.
    pub fn replies(&self, post_ref: &str) -> Result<Cached<RepliesView>> {
        let root_ref: PostRef = post_ref.trim().parse()?;
        let key = format!("replies:{}", root_ref);

        self.cache.get_or_insert_with(&key, || {
            self.store.read(|tx| {
                let root = require_post(tx, &root_ref)?;
                let descendants = collect_descendants(tx, &root_ref)?;
                let reply_count = descendants
                    .iter()
                    .filter(|p| p.kind == PostKind::Reply)
                    .count();

                Ok(RepliesView {
                    data: thread::build_reply_tree(&root_ref, &descendants, MAX_DEPTH),
                    meta: RepliesMeta {
                        parent: root_ref.to_string(),
                        version: short_version(&root.updated_at, reply_count),
                    },
                })
            })
        })
    }

    pub fn interactions(&self, post_ref: &str) -> Result<Cached<InteractionsView>> {
        let target: PostRef = post_ref.trim().parse()?;
        let key = format!("interactions:{}", target);

        self.cache.get_or_insert_with(&key, || {
            self.store.read(|tx| {
                let post = require_post(tx, &target)?;
                let reference = target.to_string();

                let mut candidates = tx.posts_replying_to(&reference)?;
                candidates.extend(tx.posts_including(&reference)?);
                let ancestors = collect_ancestors(tx, &post)?;

                Ok(InteractionsView {
                    post: reference,
                    interactions: thread::interactions(&target, &candidates),
                    parent_chain: thread::ancestor_chain(&post, &ancestors, MAX_DEPTH),
                })
            })
        })
    }

    /// Mentions of, and reactions and replies to, a feed's posts.
    pub fn notifications(&self, feed_url: &str, kind: Option<&str>) -> Result<Cached<NotificationsView>> {
        let feed_url = feed_url.trim();
        if let Some(kind) = kind {
            if !NOTIFICATION_TYPES.contains(&kind) {
                return Err(RelayError::Other(format!(
                    "Unknown notification type {} (expected one of {})",
                    kind,
                    NOTIFICATION_TYPES.join(", ")
                )));
            }
        }
        let key = format!("notifications:{}:{}", feed_url, kind.unwrap_or("all"));

        self.cache.get_or_insert_with(&key, || {
            self.store.read(|tx| {
                let profile = tx
                    .profile_by_url(feed_url)?
                    .ok_or_else(|| RelayError::FeedNotFound(feed_url.to_string()))?;

                let mut found: Vec<(Post, Notification)> = Vec::new();
                for post in tx.posts_mentioning(profile.id)? {
                    if post.feed_url != feed_url {
                        let notification = Notification::Mention {
                            post: post.reference().to_string(),
                        };
                        found.push((post, notification));
                    }
                }
                for post in tx.posts_replying_to_feed(feed_url)? {
                    if post.feed_url == feed_url {
                        continue;
                    }
                    let parent = post.reply_to.clone().unwrap_or_default();
                    let notification = match post.kind {
                        PostKind::Reaction => Notification::Reaction {
                            post: post.reference().to_string(),
                            emoji: post.mood.clone(),
                            parent,
                        },
                        PostKind::Reply => Notification::Reply {
                            post: post.reference().to_string(),
                            parent,
                        },
                        _ => continue,
                    };
                    found.push((post, notification));
                }

                found.sort_by(|(a, _), (b, _)| {
                    b.post_id
                        .cmp(&a.post_id)
                        .then_with(|| a.feed_url.cmp(&b.feed_url))
                });

                let mut counts = NotificationCounts::default();
                for (_, n) in &found {
                    match n {
                        Notification::Mention { .. } => counts.mentions += 1,
                        Notification::Reaction { .. } => counts.reactions += 1,
                        Notification::Reply { .. } => counts.replies += 1,
                        Notification::Boost { .. } => {}
                    }
                }
                counts.total = found.len();

                let data = found
                    .into_iter()
                    .map(|(_, n)| n)
                    .filter(|n| kind.map_or(true, |k| n.kind() == k))
                    .collect();
                Ok(NotificationsView {
                    feed: feed_url.to_string(),
                    data,
                    counts,
                })
            })
        })
    }

    /// Reply trees of every top-level post of a feed, newest first.
    pub fn threads(&self, feed_url: &str) -> Result<Cached<ThreadsView>> {
        let feed_url = feed_url.trim();
        let key = format!("threads:{}", feed_url);

        self.cache.get_or_insert_with(&key, || {
            self.store.read(|tx| {
                let profile = tx
                    .profile_by_url(feed_url)?
                    .ok_or_else(|| RelayError::FeedNotFound(feed_url.to_string()))?;

                let mut seen = HashSet::new();
                let mut posts = Vec::new();
                for root in tx.posts_by_profile(profile.id)? {
                    if root.reply_to.is_some() {
                        continue;
                    }
                    for below in collect_descendants(tx, &root.reference())? {
                        if seen.insert(below.reference().to_string()) {
                            posts.push(below);
                        }
                    }
                    if seen.insert(root.reference().to_string()) {
                        posts.push(root);
                    }
                }

                Ok(ThreadsView {
                    feed: feed_url.to_string(),
                    data: thread::profile_threads(feed_url, &posts, MAX_DEPTH),
                })
            })
        })
    }

    /// Polls published by a feed, newest first, with vote tallies.
    pub fn polls(&self, feed_url: &str) -> Result<Cached<PollsView>> {
        let feed_url = feed_url.trim();
        let key = format!("polls:{}", feed_url);
        let now = Utc::now();

        self.cache.get_or_insert_with(&key, || {
            self.store.read(|tx| {
                let profile = tx
                    .profile_by_url(feed_url)?
                    .ok_or_else(|| RelayError::FeedNotFound(feed_url.to_string()))?;

                let mut data = Vec::new();
                for post in tx.posts_by_profile(profile.id)? {
                    let Some(poll_end) = post.poll_end else {
                        continue;
                    };
                    let votes = tx.votes_for_poll(post.id)?;
                    // Votes naming an option the poll does not offer count only in the total.
                    let options = tx
                        .poll_options(post.id)?
                        .into_iter()
                        .map(|o| OptionTally {
                            votes: votes.iter().filter(|v| v.selected_option == o.text).count(),
                            option: o.text,
                        })
                        .collect();

                    data.push(PollSummary {
                        id: post.reference().to_string(),
                        post_id: post.post_id.clone(),
                        content: post.content.clone(),
                        poll_end,
                        is_active: poll_end > now,
                        options,
                        total_votes: votes.len(),
                    });
                }

                Ok(PollsView {
                    feed: feed_url.to_string(),
                    data,
                })
            })
        })
    }
}

fn require_post(tx: &StoreTx<'_>, reference: &PostRef) -> Result<Post> {
    tx.post_by_ref(reference)?
        .ok_or_else(|| RelayError::PostNotFound(reference.to_string()))
}

/// Every reply and reaction below `root`, level by level.
fn collect_descendants(tx: &StoreTx<'_>, root: &PostRef) -> Result<Vec<Post>> {
    let mut seen = HashSet::from([root.to_string()]);
    let mut level = vec![root.to_string()];
    let mut out = Vec::new();

    for _ in 0..MAX_DEPTH {
        if level.is_empty() {
            break;
        }
        let mut next = Vec::new();
        for parent in &level {
            for post in tx.posts_replying_to(parent)? {
                let reference = post.reference().to_string();
                if !seen.insert(reference.clone()) {
                    continue;
                }
                if post.kind == PostKind::Reply {
                    next.push(reference);
                }
                out.push(post);
            }
        }
        level = next;
    }
    Ok(out)
}

/// Stored posts above `post` in its reply chain, nearest first.
fn collect_ancestors(tx: &StoreTx<'_>, post: &Post) -> Result<Vec<Post>> {
    let mut seen = HashSet::from([post.reference().to_string()]);
    let mut out = Vec::new();
    let mut next = post.reply_to.clone();

    while let Some(parent) = next.take() {
        if out.len() >= MAX_DEPTH || !seen.insert(parent.clone()) {
            break;
        }
        let Some(reference) = PostRef::parse(&parent) else {
            break;
        };
        let Some(found) = tx.post_by_ref(&reference)? else {
            break;
        };
        next = found.reply_to.clone();
        out.push(found);
    }
    Ok(out)
}

fn short_version(updated_at: &DateTime<Utc>, count: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}_{}", updated_at.to_rfc3339(), count));
    hex::encode(hasher.finalize())[..8].to_string()
}
