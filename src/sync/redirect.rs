//! Moving a feed's state when its document now answers at another URL.

use tracing::{debug, info, warn};

use crate::app::Result;
use crate::store::{is_constraint_violation, StoreTx};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    /// Only the old URL was known; it was renamed in place.
    Renamed,
    /// Both URLs were known; the old records were folded into the new ones.
    Merged(MergeStats),
    /// Nothing left to do, typically because an earlier cycle handled it.
    AlreadyReconciled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub posts_moved: usize,
    pub posts_dropped: usize,
    pub mentions_moved: usize,
    pub mentions_dropped: usize,
    pub follows_moved: usize,
    pub follows_dropped: usize,
}

pub struct RedirectReconciler;

impl RedirectReconciler {
    /// Fold everything registered under `old_url` into `new_url`.
    ///
    /// Runs inside the caller's transaction. Rows that would collide with an
    /// existing row under the new URL are deleted rather than reported.
    pub fn reconcile(tx: &StoreTx<'_>, old_url: &str, new_url: &str) -> Result<RedirectOutcome> {
        if old_url == new_url {
            return Ok(RedirectOutcome::AlreadyReconciled);
        }

        let old_feed = tx.feed_by_url(old_url)?;
        let old_profile = tx.profile_by_url(old_url)?;
        if old_feed.is_none() && old_profile.is_none() {
            return Ok(RedirectOutcome::AlreadyReconciled);
        }

        let new_feed = tx.feed_by_url(new_url)?;
        let new_profile = tx.profile_by_url(new_url)?;

        if new_feed.is_none() && new_profile.is_none() {
            if old_feed.is_some() {
                tx.rename_feed(old_url, new_url)?;
            }
            if let Some(profile) = &old_profile {
                tx.rename_profile(profile.id, new_url)?;
            }
            info!("Renamed {} to {}", old_url, new_url);
            return Ok(RedirectOutcome::Renamed);
        }

        let mut stats = MergeStats::default();
        match (&old_profile, &new_profile) {
            (Some(old), Some(new)) => {
                Self::merge_profiles(tx, old.id, new.id, &mut stats)?;
                tx.delete_profile(old.id)?;
            }
            (Some(old), None) => tx.rename_profile(old.id, new_url)?,
            _ => {}
        }
        if old_feed.is_some() {
            tx.delete_feed(old_url)?;
        }

        info!(
            "Merged {} into {} ({} posts moved, {} duplicates dropped)",
            old_url, new_url, stats.posts_moved, stats.posts_dropped
        );
        Ok(RedirectOutcome::Merged(stats))
    }

    fn merge_profiles(tx: &StoreTx<'_>, old: i64, new: i64, stats: &mut MergeStats) -> Result<()> {
        for (row_id, edge) in tx.follows_involving(old)? {
            let follower = if edge.follower_id == old { new } else { edge.follower_id };
            let followed = if edge.followed_id == old { new } else { edge.followed_id };

            if follower == followed {
                tx.delete_follow(row_id)?;
                stats.follows_dropped += 1;
                continue;
            }
            match tx.move_follow(row_id, follower, followed) {
                Ok(()) => stats.follows_moved += 1,
                Err(e) if is_constraint_violation(&e) => {
                    debug!("Dropping duplicate follow edge {}", row_id);
                    tx.delete_follow(row_id)?;
                    stats.follows_dropped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let (moved, dropped) = tx.repoint_mentions(old, new)?;
        stats.mentions_moved = moved;
        stats.mentions_dropped = dropped;

        for post in tx.posts_by_profile(old)? {
            match tx.post_in_profile(new, &post.post_id)? {
                None => match tx.move_post(post.id, new) {
                    Ok(()) => stats.posts_moved += 1,
                    Err(e) if is_constraint_violation(&e) => {
                        warn!("Dropping post {} that collided during merge", post.post_id);
                        tx.delete_post(post.id)?;
                        stats.posts_dropped += 1;
                    }
                    Err(e) => return Err(e),
                },
                Some(existing) => {
                    tx.repoint_poll_votes(post.id, existing.id)?;
                    tx.delete_post(post.id)?;
                    stats.posts_dropped += 1;
                }
            }
        }

        Ok(())
    }
}
