use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::app::{AppContext, RelayError, Result};
use crate::store::Store;
use crate::sync::Registration;

pub async fn add_feed(ctx: &AppContext, url: &str) -> Result<()> {
    match ctx.engine.register(url).await? {
        Registration::AlreadyRegistered => {
            println!("Feed already exists: {}", url);
        }
        Registration::Added(report) => {
            println!("Added feed: {}", report.feed_url);
            if let Some(profile) = ctx.store.get_profile(&report.feed_url)? {
                println!("Profile: {}", profile.display_name());
            }
            println!("Fetched {} posts", report.created);
            if !report.discovered.is_empty() {
                println!("Discovered {} followed feeds", report.discovered.len());
            }
        }
    }
    Ok(())
}

pub fn remove_feed(ctx: &AppContext, url: &str) -> Result<()> {
    if !ctx.engine.unregister(url)? {
        return Err(RelayError::FeedNotFound(url.to_string()));
    }
    println!("Removed feed: {}", url);
    Ok(())
}

pub async fn sync_feeds(ctx: &AppContext) -> Result<()> {
    let feeds = ctx.store.get_all_feeds()?;
    if feeds.is_empty() {
        println!("No feeds to sync");
        return Ok(());
    }

    println!("Syncing {} feeds...", feeds.len());
    let report = ctx.engine.run_cycle().await;
    println!(
        "Sync complete: {} new posts, {} updated, {} deleted, {} errors ({} retryable), {} skipped",
        report.created, report.updated, report.deleted, report.failed, report.retryable, report.skipped
    );
    Ok(())
}

pub fn cleanup(ctx: &AppContext) -> Result<()> {
    let removed = ctx.engine.cleanup_stale_feeds(Utc::now())?;
    if removed.is_empty() {
        println!("No stale feeds");
    }
    for url in removed {
        println!("Removed stale feed: {}", url);
    }
    Ok(())
}

pub fn list_feeds(ctx: &AppContext) -> Result<()> {
    let feeds = ctx.store.get_all_feeds()?;

    if feeds.is_empty() {
        println!("No feeds");
        return Ok(());
    }

    let now = Utc::now();
    let stale_after = ctx.config.retention.stale_after();
    for feed in feeds {
        let name = ctx
            .store
            .get_profile(&feed.url)?
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| "(not synced yet)".to_string());
        let fetched = feed
            .last_successful_fetch_at
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let marker = if feed.is_stale(now, stale_after) { " [stale]" } else { "" };

        println!("{}{}\n  {} (last fetched {})", name, marker, feed.url, fetched);
    }

    Ok(())
}

pub fn show_replies(ctx: &AppContext, post: &str) -> Result<()> {
    print_json(&ctx.views.replies(post)?.value)
}

pub fn show_interactions(ctx: &AppContext, post: &str) -> Result<()> {
    print_json(&ctx.views.interactions(post)?.value)
}

pub fn show_notifications(ctx: &AppContext, feed: &str, kind: Option<&str>) -> Result<()> {
    print_json(&ctx.views.notifications(feed, kind)?.value)
}

pub fn show_polls(ctx: &AppContext, feed: &str) -> Result<()> {
    print_json(&ctx.views.polls(feed)?.value)
}

pub fn show_threads(ctx: &AppContext, feed: &str) -> Result<()> {
    print_json(&ctx.views.threads(feed)?.value)
}

/// Print a feed's notifications as server-sent-event frames until the
/// returned task is aborted. Heartbeats follow the configured keepalive.
pub fn watch(ctx: &AppContext, feed: &str) -> JoinHandle<()> {
    let events = ctx
        .bus
        .subscribe(feed.trim())
        .into_events(ctx.config.notifications.keepalive());

    tokio::spawn(async move {
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            print!("{}", event.to_sse_frame());
        }
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| RelayError::Other(format!("Failed to render JSON: {}", e)))?;
    println!("{}", json);
    Ok(())
}
