//! Feed synchronisation: fetch, parse, diff against the store, write, notify.

pub mod redirect;
pub mod single_flight;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::app::{RelayError, Result};
use crate::cache::{CacheCoordinator, CacheSnapshot};
use crate::config::{Config, GroupConfig, DEFAULT_WORKERS};
use crate::domain::{
    parse_poll_end, Contact, Feed, Follow, Mention, PollVote, PostDraft, PostKind, PostRef,
    ProfileUpdate,
};
use crate::fetcher::{FetchResponse, Fetcher};
use crate::notify::{DispatcherHandle, Notification, Outbound};
use crate::parser::{self, Document, Metadata, ParsedPost};
use crate::store::{SqliteStore, Store, StoreTx};

pub use redirect::{MergeStats, RedirectOutcome, RedirectReconciler};
use single_flight::{CycleGate, InFlight, InFlightGuard};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub workers: usize,
    pub discover_follows: bool,
    pub groups: GroupConfig,
    pub stale_after: chrono::Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            discover_follows: true,
            groups: GroupConfig::default(),
            stale_after: chrono::Duration::days(3),
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.sync.workers.max(1),
            discover_follows: config.sync.discover_follows,
            groups: config.groups.clone(),
            stale_after: config.retention.stale_after(),
        }
    }
}

/// What one `sync_one` call changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// URL the feed is stored under after any redirect.
    pub feed_url: String,
    pub redirect: Option<RedirectOutcome>,
    pub profile_changed: bool,
    pub created: usize,
    pub updated: usize,
    pub deleted_post_ids: Vec<String>,
    /// Feeds registered because this profile follows them.
    pub discovered: Vec<String>,
    pub notifications: Vec<Outbound>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        !self.profile_changed
            && self.created == 0
            && self.updated == 0
            && self.deleted_post_ids.is_empty()
            && self.notifications.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub feeds: usize,
    pub synced: usize,
    pub failed: usize,
    /// Failures that only defer the feed to a later cycle.
    pub retryable: usize,
    /// Feeds skipped because a sync for them was already running.
    pub skipped: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub notifications: usize,
    /// Cache state published at the end of the cycle; `None` if the cycle
    /// did not run because another one was in progress.
    pub snapshot: Option<CacheSnapshot>,
}

impl CycleReport {
    fn record_failure(&mut self, url: &str, err: &RelayError) {
        match err {
            RelayError::SyncInProgress(_) => {
                debug!(feed = %url, "already syncing, skipped");
                self.skipped += 1;
            }
            e if e.is_transient() => {
                warn!(feed = %url, "{}; retrying next cycle", e);
                self.failed += 1;
                self.retryable += 1;
            }
            e => {
                error!(feed = %url, "Sync failed: {}", e);
                self.failed += 1;
            }
        }
    }
}

/// A fetched and parsed document waiting to be written. Holds the guards
/// of every URL it will write under.
struct Fetched {
    url: String,
    response: FetchResponse,
    document: Document,
    _guards: Vec<InFlightGuard>,
}

impl Fetched {
    fn redirect_target(&self) -> Option<&str> {
        let target = self.response.final_url.as_str();
        (self.response.redirected() && target != self.url).then_some(target)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Added(SyncReport),
    AlreadyRegistered,
}

pub struct SyncEngine {
    store: Arc<SqliteStore>,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    cache: Arc<CacheCoordinator>,
    notifier: Option<DispatcherHandle>,
    options: SyncOptions,
    in_flight: InFlight,
    cycle: CycleGate,
}

impl SyncEngine {
    pub fn new(
        store: Arc<SqliteStore>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        cache: Arc<CacheCoordinator>,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            fetcher,
            cache,
            notifier: None,
            options,
            in_flight: InFlight::default(),
            cycle: CycleGate::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: DispatcherHandle) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheCoordinator> {
        &self.cache
    }

    /// Run one full pass over every registered feed.
    ///
    /// Feeds are fetched on a bounded worker pool; a failing feed is logged
    /// and the rest continue. Everything fetched is then written in a single
    /// transaction, one savepoint per feed, and the cache version is bumped
    /// before that transaction commits. Readers during the cycle keep seeing
    /// the previous state.
    pub async fn run_cycle(self: &Arc<Self>) -> CycleReport {
        let mut report = CycleReport::default();
        let Some(_ticket) = self.cycle.try_enter() else {
            info!("Previous sync cycle still running, skipping this one");
            return report;
        };

        let start = Instant::now();
        let feeds = match self.store.get_all_feeds() {
            Ok(feeds) => feeds,
            Err(e) => {
                error!("Failed to load feeds: {}", e);
                report.snapshot = Some(self.cache.bump());
                return report;
            }
        };
        report.feeds = feeds.len();

        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut handles = Vec::with_capacity(feeds.len());
        for feed in feeds {
            let engine = Arc::clone(self);
            let semaphore = semaphore.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (feed.url, Err(RelayError::Other("worker pool closed".into())));
                };
                let result = engine.fetch_one(&feed.url).await;
                (feed.url, result)
            }));
        }

        let mut fetched = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok((_, Ok(document))) => fetched.push(document),
                Ok((url, Err(e))) => report.record_failure(&url, &e),
                Err(e) => {
                    error!("Task join error: {}", e);
                    report.failed += 1;
                }
            }
        }

        // Redirect targets synced by this same cycle are already guarded.
        let held: HashSet<String> = fetched.iter().map(|f| f.url.clone()).collect();
        fetched.retain_mut(|f| match self.claim_redirect_target(f, &held) {
            Ok(()) => true,
            Err(e) => {
                report.record_failure(&f.url, &e);
                false
            }
        });

        let committed = self.store.write(|tx| {
            let results: Vec<(String, Result<SyncReport>)> = fetched
                .iter()
                .map(|f| (f.url.clone(), self.stage(tx, f)))
                .collect();
            // Bumped while the connection is still held.
            Ok((results, self.cache.bump()))
        });

        match committed {
            Ok((results, snapshot)) => {
                for (url, result) in results {
                    match result {
                        Ok(sync) => {
                            self.announce(&sync);
                            report.synced += 1;
                            report.created += sync.created;
                            report.updated += sync.updated;
                            report.deleted += sync.deleted_post_ids.len();
                            report.notifications += sync.notifications.len();
                        }
                        Err(e) => {
                            error!(feed = %url, "Failed to store sync result: {}", e);
                            report.failed += 1;
                        }
                    }
                }
                report.snapshot = Some(snapshot);
            }
            Err(e) => {
                error!("Failed to commit sync cycle: {}", e);
                report.failed += fetched.len();
                report.snapshot = Some(self.cache.snapshot());
            }
        }

        info!(
            "Sync cycle complete: {} feeds, {} synced, {} failed ({} retryable), {} skipped, {} new posts, {} updated, {} deleted ({:.1}s)",
            report.feeds,
            report.synced,
            report.failed,
            report.retryable,
            report.skipped,
            report.created,
            report.updated,
            report.deleted,
            start.elapsed().as_secs_f64()
        );
        report
    }

    /// Fetch and apply one feed outside a cycle, publishing a new cache
    /// version when it succeeds. Nothing but the fetch stamp is written
    /// unless the fetch succeeded with a 2xx status.
    pub async fn sync_one(&self, feed: &Feed) -> Result<SyncReport> {
        let mut fetched = self.fetch_one(&feed.url).await?;
        self.claim_redirect_target(&mut fetched, &HashSet::new())?;
        self.write_one(&fetched)
    }

    /// Validate and register a new feed, then sync it from the same fetch.
    pub async fn register(&self, url: &str) -> Result<Registration> {
        let url = url.trim();
        validate_feed_url(url)?;
        if self.store.get_feed_by_url(url)?.is_some() {
            return Ok(Registration::AlreadyRegistered);
        }

        let mut fetched = self.fetch_one(url).await?;
        if !fetched.document.is_org_social() {
            return Err(RelayError::InvalidFeed(format!(
                "{} has no NICK, TITLE or posts",
                url
            )));
        }
        self.claim_redirect_target(&mut fetched, &HashSet::new())?;

        self.store.add_feed(url)?;
        info!("Registered feed {}", url);
        Ok(Registration::Added(self.write_one(&fetched)?))
    }

    pub fn unregister(&self, url: &str) -> Result<bool> {
        let removed = self.store.delete_feed(url.trim())?;
        if removed {
            info!("Removed feed {}", url);
        }
        Ok(removed)
    }

    /// Delete feeds whose last successful fetch is older than the retention
    /// window. Feeds never fetched successfully are kept.
    pub fn cleanup_stale_feeds(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let removed = self
            .store
            .delete_stale_feeds(now - self.options.stale_after)?;
        for url in &removed {
            info!("Removed stale feed {}", url);
        }
        Ok(removed)
    }

    async fn fetch_document(&self, url: &str) -> Result<FetchResponse> {
        let response = self.fetcher.fetch(url).await.map_err(|e| {
            warn!(feed = %url, "Fetch failed: {}", e);
            e
        })?;
        if !response.is_success() {
            warn!(feed = %url, status = response.status, "Fetch returned non-success status");
            return Err(RelayError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }

    /// Take the feed's guard, then fetch and parse it.
    async fn fetch_one(&self, url: &str) -> Result<Fetched> {
        let Some(guard) = self.in_flight.try_acquire(url) else {
            return Err(RelayError::SyncInProgress(url.to_string()));
        };
        let response = self.fetch_document(url).await?;
        let document = parser::parse_bytes(&response.body);
        Ok(Fetched {
            url: url.to_string(),
            response,
            document,
            _guards: vec![guard],
        })
    }

    /// A redirected feed writes under its new URL, so it needs that URL's
    /// guard too unless `held` already covers it.
    fn claim_redirect_target(&self, fetched: &mut Fetched, held: &HashSet<String>) -> Result<()> {
        let Some(target) = fetched.redirect_target() else {
            return Ok(());
        };
        if held.contains(target) {
            return Ok(());
        }
        let guard = self
            .in_flight
            .try_acquire(target)
            .ok_or_else(|| RelayError::SyncInProgress(target.to_string()))?;
        fetched._guards.push(guard);
        Ok(())
    }

    fn write_one(&self, fetched: &Fetched) -> Result<SyncReport> {
        let result = self.store.write(|tx| {
            let result = self.stage(tx, fetched);
            if result.is_ok() {
                self.cache.bump();
            }
            Ok(result)
        })?;
        let report = result.map_err(|e| {
            error!(feed = %fetched.url, "Failed to store sync result: {}", e);
            e
        })?;
        self.announce(&report);
        Ok(report)
    }

    /// Write one fetched feed inside `tx`. The fetch stamp is recorded
    /// outside the feed's savepoint, so it survives a failed write.
    fn stage(&self, tx: &StoreTx<'_>, fetched: &Fetched) -> Result<SyncReport> {
        let now = Utc::now();
        tx.mark_fetched(&fetched.url, now)?;

        tx.savepoint(|tx| {
            let mut report = SyncReport {
                feed_url: fetched.url.clone(),
                ..Default::default()
            };
            if let Some(target) = fetched.redirect_target() {
                report.redirect = Some(RedirectReconciler::reconcile(tx, &fetched.url, target)?);
                report.feed_url = target.to_string();
                tx.mark_fetched(target, now)?;
            }

            let feed_url = report.feed_url.clone();
            self.apply(tx, &feed_url, &fetched.document, &mut report)?;
            Ok(report)
        })
    }

    /// Hand a committed report's events to the dispatcher and log it.
    fn announce(&self, report: &SyncReport) {
        if let Some(notifier) = &self.notifier {
            for outbound in &report.notifications {
                notifier.enqueue(outbound.clone());
            }
        }

        if report.is_noop() {
            debug!(feed = %report.feed_url, "unchanged");
        } else {
            info!(
                feed = %report.feed_url,
                "{} new, {} updated, {} deleted, {} notifications",
                report.created,
                report.updated,
                report.deleted_post_ids.len(),
                report.notifications.len()
            );
        }
    }

    fn apply(
        &self,
        tx: &StoreTx<'_>,
        feed_url: &str,
        document: &Document,
        report: &mut SyncReport,
    ) -> Result<()> {
        let digest = document_digest(document)?;
        let update = profile_update(&document.metadata, &digest);
        let profile_id = match tx.profile_by_url(feed_url)? {
            None => {
                report.profile_changed = true;
                tx.insert_profile(feed_url, &update)?
            }
            Some(profile) if profile.version_hash != digest => {
                report.profile_changed = true;
                tx.update_profile(profile.id, &update)?;
                profile.id
            }
            Some(profile) => profile.id,
        };

        if report.profile_changed {
            self.replace_profile_children(tx, profile_id, &document.metadata, report)?;
        }

        // Posts are reconciled even when the digest matched.
        self.apply_posts(tx, profile_id, feed_url, &document.posts, report)
    }

    fn replace_profile_children(
        &self,
        tx: &StoreTx<'_>,
        profile_id: i64,
        metadata: &Metadata,
        report: &mut SyncReport,
    ) -> Result<()> {
        let links: Vec<String> = metadata
            .links
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        tx.replace_links(profile_id, &links)?;

        let contacts: Vec<Contact> = metadata
            .contacts
            .iter()
            .filter_map(|c| Contact::parse(c))
            .collect();
        tx.replace_contacts(profile_id, &contacts)?;

        let mut edges = Vec::new();
        for entry in &metadata.follows {
            if let Some(followed) = tx.profile_by_url(&entry.url)? {
                if followed.id != profile_id {
                    edges.push(Follow {
                        follower_id: profile_id,
                        followed_id: followed.id,
                        nickname: entry.nickname.clone().unwrap_or_default(),
                    });
                }
            } else if self.options.discover_follows
                && validate_feed_url(&entry.url).is_ok()
                && tx.feed_by_url(&entry.url)?.is_none()
            {
                tx.insert_feed(&entry.url)?;
                debug!("Discovered feed {} via FOLLOW", entry.url);
                report.discovered.push(entry.url.clone());
            }
        }
        tx.replace_follows(profile_id, &edges)
    }

    fn apply_posts(
        &self,
        tx: &StoreTx<'_>,
        profile_id: i64,
        feed_url: &str,
        posts: &[ParsedPost],
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut stored: HashMap<String, crate::domain::Post> = tx
            .posts_by_profile(profile_id)?
            .into_iter()
            .map(|p| (p.post_id.clone(), p))
            .collect();
        let mut seen = HashSet::new();

        for parsed in posts {
            // First occurrence of a duplicated id wins.
            if !seen.insert(parsed.id.as_str()) {
                debug!(feed = %feed_url, "duplicate post id {} ignored", parsed.id);
                continue;
            }

            let reply_to = parsed.property("reply_to").map(str::to_string);
            let selected_option = parsed.property("poll_option");
            let poll_target = match (selected_option, reply_to.as_deref().and_then(PostRef::parse)) {
                (Some(_), Some(target)) => tx.post_by_ref(&target)?,
                _ => None,
            };
            let draft = self.draft(parsed, reply_to, poll_target.is_some());

            let (row_id, created) = match stored.remove(&parsed.id) {
                Some(existing) => {
                    if !existing.matches(&draft) {
                        tx.update_post(existing.id, &draft)?;
                        report.updated += 1;
                    }
                    (existing.id, false)
                }
                None => {
                    report.created += 1;
                    (tx.insert_post(profile_id, &draft)?, true)
                }
            };

            if !parsed.poll_options.is_empty() {
                let wanted = dedup_options(&parsed.poll_options);
                let current: Vec<String> = tx
                    .poll_options(row_id)?
                    .into_iter()
                    .map(|o| o.text)
                    .collect();
                if current != wanted {
                    tx.replace_poll_options(row_id, &wanted)?;
                }
            }

            match (&poll_target, selected_option) {
                (Some(target), Some(option)) => {
                    let vote = PollVote {
                        vote_post_id: row_id,
                        poll_post_id: target.id,
                        selected_option: option.to_string(),
                    };
                    if tx.vote_cast_by(row_id)?.as_ref() != Some(&vote) {
                        tx.upsert_poll_vote(&vote)?;
                    }
                }
                _ if !created => {
                    tx.delete_votes_cast_by(row_id)?;
                }
                _ => {}
            }

            let reference = PostRef::new(feed_url, parsed.id.as_str()).to_string();
            if created {
                report
                    .notifications
                    .extend(interaction_events(&draft, &reference, poll_target.is_some()));
            }

            for mention in &parsed.mentions {
                let Some(target) = tx.profile_by_url(&mention.url)? else {
                    continue;
                };
                let inserted = tx.insert_mention(&Mention {
                    post_id: row_id,
                    mentioned_profile_id: target.id,
                    nickname: mention.nickname.clone(),
                })?;
                if inserted {
                    report.notifications.push(Outbound {
                        recipient: target.feed_url,
                        notification: Notification::Mention {
                            post: reference.clone(),
                        },
                    });
                }
            }
        }

        // Whatever was stored but not seen in this parse was deleted upstream.
        for (post_id, post) in stored {
            tx.delete_post(post.id)?;
            report.deleted_post_ids.push(post_id);
        }
        report.deleted_post_ids.sort();
        Ok(())
    }

    fn draft(&self, parsed: &ParsedPost, reply_to: Option<String>, is_poll_vote: bool) -> PostDraft {
        let text = |key: &str| parsed.property(key).unwrap_or_default().to_string();
        let include = parsed.property("include").map(str::to_string);
        let mood = text("mood");
        let kind = PostKind::classify(
            &parsed.content,
            reply_to.as_deref(),
            &mood,
            include.as_deref(),
            is_poll_vote,
        );
        let group = parsed
            .property("group")
            .and_then(group_slug)
            .filter(|slug| self.options.groups.is_enabled(slug))
            .unwrap_or_default();

        PostDraft {
            post_id: parsed.id.clone(),
            content: parsed.content.clone(),
            language: text("lang"),
            tags: text("tags"),
            client: text("client"),
            reply_to,
            mood,
            group,
            include,
            poll_end: parsed.property("poll_end").and_then(parse_poll_end),
            kind,
        }
    }
}

/// Events a newly created post triggers, addressed to the feeds it targets.
fn interaction_events(draft: &PostDraft, reference: &str, is_poll_vote: bool) -> Vec<Outbound> {
    let mut events = Vec::new();

    if let Some(parent) = draft.reply_to.as_deref() {
        if let Some(target) = PostRef::parse(parent) {
            let notification = if !draft.mood.is_empty() {
                Some(Notification::Reaction {
                    post: reference.to_string(),
                    emoji: draft.mood.clone(),
                    parent: parent.to_string(),
                })
            } else if !is_poll_vote {
                Some(Notification::Reply {
                    post: reference.to_string(),
                    parent: parent.to_string(),
                })
            } else {
                None
            };
            if let Some(notification) = notification {
                events.push(Outbound {
                    recipient: target.feed_url,
                    notification,
                });
            }
        }
    }

    if let Some(boosted) = draft.include.as_deref() {
        if let Some(target) = PostRef::parse(boosted) {
            events.push(Outbound {
                recipient: target.feed_url,
                notification: Notification::Boost {
                    post: reference.to_string(),
                    boosted: boosted.to_string(),
                },
            });
        }
    }

    events
}

fn profile_update(metadata: &Metadata, digest: &str) -> ProfileUpdate {
    ProfileUpdate {
        title: metadata.title.clone(),
        nick: metadata.nick.clone(),
        description: metadata.description.clone(),
        avatar: metadata.avatar.clone(),
        location: metadata.location.clone(),
        birthday: metadata.birthday.clone(),
        language: metadata.language.clone(),
        pinned: metadata.pinned.clone(),
        version_hash: digest.to_string(),
    }
}

/// SHA-256 over the parsed metadata and posts.
pub fn document_digest(document: &Document) -> Result<String> {
    let bytes = serde_json::to_vec(document)
        .map_err(|e| RelayError::Other(format!("Failed to serialise document: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Accept only absolute http(s) URLs.
pub fn validate_feed_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RelayError::InvalidFeed(format!(
            "{} uses unsupported scheme {}",
            raw, other
        ))),
    }
}

/// Slug of a `GROUP` value such as `Emacs https://relay.example.com`.
pub fn group_slug(raw: &str) -> Option<String> {
    let name = raw.split("http").next().unwrap_or_default();
    let mut slug = String::new();
    for c in name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    (!slug.is_empty()).then_some(slug)
}

fn dedup_options(options: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(options.len());
    for option in options {
        if !out.contains(option) {
            out.push(option.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::scripted::ScriptedFetcher;
    use crate::notify::{spawn_dispatcher, NotificationBus};

    const ALICE: &str = "https://alice.example.com/social.org";
    const BOB: &str = "https://bob.example.com/social.org";
    const CAROL: &str = "https://carol.example.com/social.org";

    fn alice_doc(extra_post: bool) -> String {
        let mut doc = String::from(
            "#+TITLE: Alice
#+NICK: alice
#+LINK: https://alice.example.com
#+CONTACT: mailto:alice@example.com
#+FOLLOW: bob https://bob.example.com/social.org

* Posts
** 2025-01-01T10:00:00+0100
:PROPERTIES:
:LANG: en
:END:

Hello world

** 2025-01-02T10:00:00+0100
:PROPERTIES:
:POLL_END: 2030-02-01T10:00:00+0100
:END:

Best editor?

- [ ] Emacs
- [ ] Vim
",
        );
        if extra_post {
            doc.push_str(
                "
** 2025-01-03T10:00:00+0100
:PROPERTIES:
:GROUP: Emacs https://relay.example.com
:END:

Hi [[org-social:https://bob.example.com/social.org][bob]]
",
            );
        }
        doc
    }

    fn bob_doc(reply_text: &str) -> String {
        format!(
            "#+NICK: bob

* Posts
** 2025-01-05T10:00:00+0100
:PROPERTIES:
:REPLY_TO: https://alice.example.com/social.org#2025-01-01T10:00:00+0100
:END:

{}

** 2025-01-06T10:00:00+0100
:PROPERTIES:
:REPLY_TO: https://alice.example.com/social.org#2025-01-01T10:00:00+0100
:MOOD: ❤
:END:

** 2025-01-07T10:00:00+0100
:PROPERTIES:
:INCLUDE: https://alice.example.com/social.org#2025-01-01T10:00:00+0100
:END:

** 2025-01-08T10:00:00+0100
:PROPERTIES:
:REPLY_TO: https://alice.example.com/social.org#2025-01-02T10:00:00+0100
:POLL_OPTION: Emacs
:END:
",
            reply_text
        )
    }

    fn engine_with(fetcher: Arc<ScriptedFetcher>, options: SyncOptions) -> Arc<SyncEngine> {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cache = Arc::new(CacheCoordinator::new());
        Arc::new(SyncEngine::new(store, fetcher, cache, options))
    }

    fn engine(fetcher: Arc<ScriptedFetcher>) -> Arc<SyncEngine> {
        engine_with(fetcher, SyncOptions::default())
    }

    async fn sync(engine: &SyncEngine, url: &str) -> Result<SyncReport> {
        engine.store().add_feed(url)?;
        let feed = engine.store().get_feed_by_url(url)?.unwrap();
        engine.sync_one(&feed).await
    }

    #[tokio::test]
    async fn test_first_sync_creates_profile_posts_and_poll() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(ALICE, &alice_doc(false));
        let engine = engine(fetcher);

        let report = sync(&engine, ALICE).await.unwrap();
        assert!(report.profile_changed);
        assert_eq!(report.created, 2);

        engine
            .store()
            .read(|tx| {
                let profile = tx.profile_by_url(ALICE)?.unwrap();
                assert_eq!(profile.nick, "alice");
                assert_eq!(tx.links(profile.id)?, vec!["https://alice.example.com"]);
                assert_eq!(tx.contacts(profile.id)?[0].contact_type, "mailto");

                let poll = tx
                    .post_in_profile(profile.id, "2025-01-02T10:00:00+0100")?
                    .unwrap();
                assert!(poll.is_poll());
                let options: Vec<String> =
                    tx.poll_options(poll.id)?.into_iter().map(|o| o.text).collect();
                assert_eq!(options, vec!["Emacs", "Vim"]);

                let feed = tx.feed_by_url(ALICE)?.unwrap();
                assert!(feed.last_successful_fetch_at.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_unchanged_document_second_sync_is_noop() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(ALICE, &alice_doc(true));
        fetcher.serve(BOB, &bob_doc("Nice"));
        let engine = engine(fetcher);

        sync(&engine, BOB).await.unwrap();
        sync(&engine, ALICE).await.unwrap();
        let again = sync(&engine, ALICE).await.unwrap();

        assert!(again.is_noop(), "unexpected changes: {:?}", again);
        assert!(again.notifications.is_empty());
    }

    #[tokio::test]
    async fn test_removed_post_is_deleted_with_children() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(ALICE, &alice_doc(true));
        fetcher.serve(BOB, &bob_doc("Nice"));
        let engine = engine(fetcher.clone());

        sync(&engine, BOB).await.unwrap();
        sync(&engine, ALICE).await.unwrap();

        fetcher.serve(ALICE, &alice_doc(false));
        let report = sync(&engine, ALICE).await.unwrap();
        assert_eq!(report.deleted_post_ids, vec!["2025-01-03T10:00:00+0100"]);
        assert_eq!(report.created, 0);
        assert_eq!(report.updated, 0);

        engine
            .store()
            .read(|tx| {
                let alice = tx.profile_by_url(ALICE)?.unwrap();
                assert_eq!(tx.posts_by_profile(alice.id)?.len(), 2);
                let bob = tx.profile_by_url(BOB)?.unwrap();
                assert!(tx.posts_mentioning(bob.id)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_interactions_notify_once_on_creation() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(ALICE, &alice_doc(false));
        fetcher.serve(BOB, &bob_doc("Nice"));
        let engine = engine(fetcher.clone());

        sync(&engine, ALICE).await.unwrap();
        let report = sync(&engine, BOB).await.unwrap();

        let kinds: Vec<&str> = report
            .notifications
            .iter()
            .map(|o| o.notification.kind())
            .collect();
        assert_eq!(kinds, vec!["reply", "reaction", "boost"]);
        assert!(report.notifications.iter().all(|o| o.recipient == ALICE));
        assert_eq!(
            report.notifications[1].notification,
            Notification::Reaction {
                post: format!("{}#2025-01-06T10:00:00+0100", BOB),
                emoji: "❤".into(),
                parent: format!("{}#2025-01-01T10:00:00+0100", ALICE),
            }
        );

        // Editing the reply updates the row but announces nothing.
        fetcher.serve(BOB, &bob_doc("Nice, edited"));
        let edited = sync(&engine, BOB).await.unwrap();
        assert_eq!(edited.updated, 1);
        assert!(edited.notifications.is_empty());
    }

    #[tokio::test]
    async fn test_poll_vote_recorded_and_classified() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(ALICE, &alice_doc(false));
        fetcher.serve(BOB, &bob_doc("Nice"));
        let engine = engine(fetcher);

        sync(&engine, ALICE).await.unwrap();
        sync(&engine, BOB).await.unwrap();

        engine
            .store()
            .read(|tx| {
                let vote_ref = PostRef::new(BOB, "2025-01-08T10:00:00+0100");
                let vote_post = tx.post_by_ref(&vote_ref)?.unwrap();
                assert_eq!(vote_post.kind, PostKind::PollVote);

                let poll_ref = PostRef::new(ALICE, "2025-01-02T10:00:00+0100");
                let poll = tx.post_by_ref(&poll_ref)?.unwrap();
                let votes = tx.votes_for_poll(poll.id)?;
                assert_eq!(votes.len(), 1);
                assert_eq!(votes[0].selected_option, "Emacs");

                let reaction = tx
                    .post_by_ref(&PostRef::new(BOB, "2025-01-06T10:00:00+0100"))?
                    .unwrap();
                assert_eq!(reaction.kind, PostKind::Reaction);
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_mention_notifies_only_when_new() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(BOB, &bob_doc("Nice"));
        fetcher.serve(ALICE, &alice_doc(true));
        let engine = engine(fetcher.clone());

        sync(&engine, BOB).await.unwrap();
        let report = sync(&engine, ALICE).await.unwrap();
        let mentions: Vec<&Outbound> = report
            .notifications
            .iter()
            .filter(|o| o.notification.kind() == "mention")
            .collect();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].recipient, BOB);

        let edited = alice_doc(true).replace("Hi [[org", "Hello again [[org");
        fetcher.serve(ALICE, &edited);
        let report = sync(&engine, ALICE).await.unwrap();
        assert_eq!(report.updated, 1);
        assert!(report.notifications.is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_writes_nothing() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.fail(ALICE, 500);
        fetcher.time_out(BOB);
        let engine = engine(fetcher);

        let err = sync(&engine, ALICE).await.unwrap_err();
        assert!(matches!(err, RelayError::HttpStatus { status: 500, .. }));
        let err = sync(&engine, BOB).await.unwrap_err();
        assert!(err.is_transient());

        let feed = engine.store().get_feed_by_url(ALICE).unwrap().unwrap();
        assert!(feed.last_successful_fetch_at.is_none());
        assert!(engine.store().get_profile(ALICE).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redirect_moves_feed_to_final_url() {
        let old = "https://old.example.com/social.org";
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(old, &alice_doc(false));
        let engine = engine(fetcher.clone());
        sync(&engine, old).await.unwrap();

        fetcher.redirect(old, ALICE);
        fetcher.serve(ALICE, &alice_doc(false));
        let feed = engine.store().get_feed_by_url(old).unwrap().unwrap();
        let report = engine.sync_one(&feed).await.unwrap();

        assert_eq!(report.feed_url, ALICE);
        assert_eq!(report.redirect, Some(RedirectOutcome::Renamed));
        assert_eq!(report.created, 0);
        assert!(engine.store().get_feed_by_url(old).unwrap().is_none());
        assert!(engine.store().get_profile(ALICE).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_same_feed_is_not_synced_concurrently() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(ALICE, &alice_doc(false));
        let engine = engine(fetcher);

        let _held = engine.in_flight.try_acquire(ALICE).unwrap();
        let err = sync(&engine, ALICE).await.unwrap_err();
        assert!(matches!(err, RelayError::SyncInProgress(_)));
    }

    #[tokio::test]
    async fn test_cycle_continues_past_failures_and_bumps_cache() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(ALICE, &alice_doc(false));
        fetcher.fail(BOB, 503);
        let engine = engine(fetcher);
        engine.store().add_feed(ALICE).unwrap();
        engine.store().add_feed(BOB).unwrap();
        let before = engine.cache().snapshot();

        let report = engine.run_cycle().await;
        assert_eq!(report.feeds, 2);
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.retryable, 1);
        let snapshot = report.snapshot.unwrap();
        assert_eq!(snapshot.version, before.version + 1);
        assert_eq!(engine.cache().snapshot(), snapshot);
    }

    const REJECT_POISON: &str = "CREATE TRIGGER reject_poison BEFORE INSERT ON posts
         WHEN NEW.content LIKE '%poison%'
         BEGIN SELECT RAISE(ABORT, 'rejected'); END;";

    #[tokio::test]
    async fn test_failed_write_still_records_fetch() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(ALICE, "#+NICK: alice\n\n* Posts\n** 2025-01-01T10:00:00+0100\n\npoison\n");
        let engine = engine(fetcher);
        engine
            .store()
            .write(|tx| tx.execute_batch(REJECT_POISON))
            .unwrap();

        assert!(sync(&engine, ALICE).await.is_err());

        let feed = engine.store().get_feed_by_url(ALICE).unwrap().unwrap();
        assert!(feed.last_successful_fetch_at.is_some());
        assert!(engine.store().get_profile(ALICE).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cycle_isolates_a_failing_write() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(ALICE, &alice_doc(false));
        fetcher.serve(BOB, &bob_doc("poison"));
        let engine = engine(fetcher);
        engine
            .store()
            .write(|tx| tx.execute_batch(REJECT_POISON))
            .unwrap();
        engine.store().add_feed(ALICE).unwrap();
        engine.store().add_feed(BOB).unwrap();

        let report = engine.run_cycle().await;
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.retryable, 0);

        assert!(engine.store().get_profile(ALICE).unwrap().is_some());
        assert!(engine.store().get_profile(BOB).unwrap().is_none());
        let bob = engine.store().get_feed_by_url(BOB).unwrap().unwrap();
        assert!(bob.last_successful_fetch_at.is_some());
    }

    #[tokio::test]
    async fn test_redirect_to_a_feed_being_synced_is_skipped() {
        let old = "https://old.example.com/social.org";
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(old, &alice_doc(false));
        let engine = engine(fetcher.clone());
        sync(&engine, old).await.unwrap();

        fetcher.redirect(old, ALICE);
        fetcher.serve(ALICE, &alice_doc(false));
        let feed = engine.store().get_feed_by_url(old).unwrap().unwrap();

        let held = engine.in_flight.try_acquire(ALICE).unwrap();
        let err = engine.sync_one(&feed).await.unwrap_err();
        assert!(matches!(err, RelayError::SyncInProgress(ref url) if url.as_str() == ALICE));
        assert!(engine.store().get_feed_by_url(old).unwrap().is_some());
        assert!(engine.store().get_profile(ALICE).unwrap().is_none());

        drop(held);
        let report = engine.sync_one(&feed).await.unwrap();
        assert_eq!(report.redirect, Some(RedirectOutcome::Renamed));
    }

    #[tokio::test]
    async fn test_redirect_within_one_cycle_merges_into_target() {
        let old = "https://old.example.com/social.org";
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(old, &alice_doc(false));
        fetcher.serve(ALICE, &alice_doc(false));
        let engine = engine(fetcher.clone());
        sync(&engine, old).await.unwrap();
        sync(&engine, ALICE).await.unwrap();

        fetcher.redirect(old, ALICE);
        let report = engine.run_cycle().await;
        assert_eq!(report.skipped, 0);
        assert_eq!(report.synced, 2);
        assert!(engine.store().get_feed_by_url(old).unwrap().is_none());
        assert!(engine.store().get_profile(old).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let engine = engine(Arc::new(ScriptedFetcher::new()));
        let _ticket = engine.cycle.try_enter().unwrap();
        let report = engine.run_cycle().await;
        assert!(report.snapshot.is_none());
    }

    #[tokio::test]
    async fn test_register_validates_document() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(ALICE, &alice_doc(false));
        fetcher.serve(CAROL, "just some text\n");
        let engine = engine(fetcher);

        assert!(matches!(
            engine.register("ftp://alice.example.com/social.org").await,
            Err(RelayError::InvalidFeed(_))
        ));
        assert!(matches!(
            engine.register(CAROL).await,
            Err(RelayError::InvalidFeed(_))
        ));
        assert!(engine.store().get_feed_by_url(CAROL).unwrap().is_none());

        let Registration::Added(report) = engine.register(ALICE).await.unwrap() else {
            panic!("expected a new registration");
        };
        assert_eq!(report.created, 2);
        assert_eq!(
            engine.register(ALICE).await.unwrap(),
            Registration::AlreadyRegistered
        );
    }

    #[tokio::test]
    async fn test_follow_edges_and_discovery() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let doc = alice_doc(false).replace(
            "#+FOLLOW: bob https://bob.example.com/social.org",
            "#+FOLLOW: bob https://bob.example.com/social.org\n#+FOLLOW: https://carol.example.com/social.org",
        );
        fetcher.serve(ALICE, &doc);
        fetcher.serve(BOB, &bob_doc("Nice"));
        let engine = engine(fetcher);

        sync(&engine, BOB).await.unwrap();
        let report = sync(&engine, ALICE).await.unwrap();
        assert_eq!(report.discovered, vec![CAROL]);
        assert!(engine.store().get_feed_by_url(CAROL).unwrap().is_some());

        engine
            .store()
            .read(|tx| {
                let alice = tx.profile_by_url(ALICE)?.unwrap();
                let follows = tx.follows_of(alice.id)?;
                assert_eq!(follows.len(), 1);
                assert_eq!(follows[0].nickname, "bob");
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_group_recorded_only_when_enabled() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(ALICE, &alice_doc(true));
        let options = SyncOptions {
            groups: GroupConfig {
                enabled: vec!["emacs".into()],
            },
            ..Default::default()
        };
        let engine = engine_with(fetcher.clone(), options);
        sync(&engine, ALICE).await.unwrap();
        let post = engine
            .store()
            .get_post(&PostRef::new(ALICE, "2025-01-03T10:00:00+0100"))
            .unwrap()
            .unwrap();
        assert_eq!(post.group, "emacs");

        let plain = engine_with(fetcher, SyncOptions::default());
        sync(&plain, ALICE).await.unwrap();
        let post = plain
            .store()
            .get_post(&PostRef::new(ALICE, "2025-01-03T10:00:00+0100"))
            .unwrap()
            .unwrap();
        assert_eq!(post.group, "");
    }

    #[tokio::test]
    async fn test_notifications_reach_subscribers_through_dispatcher() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.serve(ALICE, &alice_doc(false));
        fetcher.serve(BOB, &bob_doc("Nice"));

        let bus = Arc::new(NotificationBus::default());
        let mut sub = bus.subscribe(ALICE);
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = SyncEngine::new(
            store,
            fetcher,
            Arc::new(CacheCoordinator::new()),
            SyncOptions::default(),
        )
        .with_notifier(spawn_dispatcher(bus.clone(), 16));

        sync(&engine, ALICE).await.unwrap();
        sync(&engine, BOB).await.unwrap();

        let first = tokio::time::timeout(std::time::Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.kind(), "reply");
    }

    #[test]
    fn test_group_slug() {
        assert_eq!(
            group_slug("Emacs https://relay.example.com").as_deref(),
            Some("emacs")
        );
        assert_eq!(
            group_slug("Org Social  https://relay.example.com").as_deref(),
            Some("org-social")
        );
        assert_eq!(group_slug("https://relay.example.com"), None);
    }

    #[test]
    fn test_digest_changes_with_posts() {
        let a = parser::parse(&alice_doc(false));
        let b = parser::parse(&alice_doc(true));
        assert_eq!(document_digest(&a).unwrap(), document_digest(&a).unwrap());
        assert_ne!(document_digest(&a).unwrap(), document_digest(&b).unwrap());
    }
}
