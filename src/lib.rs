//! # orgrelay
//!
//! A relay for Org Social: it polls registered `social.org` feeds, keeps a
//! normalized copy of their profiles and posts, and tracks the replies,
//! reactions, boosts, mentions and poll votes exchanged between them.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler → SyncEngine → Fetcher → Parser → Store
//!                 │                            │
//!                 └→ Dispatcher → Bus     Views (cached) ← CLI
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! # Register a feed
//! orgrelay add https://example.com/social.org
//!
//! # Sync every feed once
//! orgrelay sync
//!
//! # Keep syncing every minute
//! orgrelay daemon --interval 1m
//!
//! # Inspect a thread
//! orgrelay replies 'https://example.com/social.org#2025-01-01T10:00:00+0100'
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// store, fetcher, cache, notification bus and sync engine.
pub mod app;

/// Cycle-scoped response cache with a global ETag/Last-Modified pair.
pub mod cache;

/// Command-line interface using clap.
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/orgrelay/config.toml`.
pub mod config;

/// Foreground scheduler for sync cycles and stale-feed cleanup.
pub mod daemon;

/// Core domain models.
///
/// - [`Feed`](domain::Feed), [`Profile`](domain::Profile), [`Post`](domain::Post)
/// - [`PostRef`](domain::PostRef): canonical `{feed}#{id}` reference
/// - [`PostKind`](domain::PostKind): classification computed at ingestion
pub mod domain;

/// HTTP fetching that reports the redirect chain.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for document fetching
/// - [`HttpFetcher`](fetcher::http_fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Per-feed notification fan-out.
pub mod notify;

/// Org Social document parser and canonical serializer.
pub mod parser;

/// Read-side views consumed by the CLI.
pub mod query;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining unit-of-work access
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;

/// Feed synchronisation and redirect reconciliation.
pub mod sync;

/// Reply trees and ancestor chains.
pub mod thread;
