//! Scheduler that keeps every registered feed in sync.
//!
//! Runs in the foreground: one timer drives sync cycles, a second one reaps
//! stale feeds, and SIGINT/SIGTERM stop the loop between cycles.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::app::{AppContext, Result};
use crate::config::{Config, ConfigError};

/// Longest accepted interval: one year.
const MAX_INTERVAL_SECS: u64 = 365 * 86400;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Seconds between sync cycles (default: 60)
    pub sync_interval_secs: u64,
    /// Seconds between stale-feed cleanups (default: 3 days)
    pub cleanup_interval_secs: u64,
    /// Whether to run a cycle immediately on start
    pub update_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 60,
            cleanup_interval_secs: 3 * 86400,
            update_on_start: true,
        }
    }
}

impl DaemonConfig {
    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            sync_interval_secs: config.sync.interval()?.as_secs(),
            cleanup_interval_secs: config.retention.cleanup_interval()?.as_secs(),
            update_on_start: true,
        })
    }

    /// Parse interval string like "1h", "30m", "6h", "1d"
    pub fn parse_interval(s: &str) -> std::result::Result<u64, String> {
        let s = s.trim().to_lowercase();

        let too_large = || format!("Interval too large: {}", s);
        let scaled = |digits: &str, unit: u64, name: &str| -> std::result::Result<u64, String> {
            digits
                .parse::<u64>()
                .map_err(|_| format!("Invalid {}: {}", name, digits))?
                .checked_mul(unit)
                .ok_or_else(too_large)
        };

        let secs = if let Some(hours) = s.strip_suffix('h') {
            scaled(hours, 3600, "hours")
        } else if let Some(minutes) = s.strip_suffix('m') {
            scaled(minutes, 60, "minutes")
        } else if let Some(days) = s.strip_suffix('d') {
            scaled(days, 86400, "days")
        } else if let Some(secs) = s.strip_suffix('s') {
            scaled(secs, 1, "seconds")
        } else {
            // Try parsing as raw seconds
            s.parse::<u64>()
                .map_err(|_| format!("Invalid interval: {}. Use format like '30s', '1m', '1d'", s))
        }?;

        if secs == 0 {
            return Err("Interval must be greater than zero".to_string());
        }
        if secs > MAX_INTERVAL_SECS {
            return Err(too_large());
        }
        Ok(secs)
    }

    /// Format interval for display
    pub fn format_interval(secs: u64) -> String {
        if secs >= 86400 && secs % 86400 == 0 {
            format!("{}d", secs / 86400)
        } else if secs >= 3600 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs >= 60 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}

/// Daemon runner
pub struct Daemon {
    ctx: Arc<AppContext>,
    config: DaemonConfig,
    shutdown: Arc<Notify>,
}

impl Daemon {
    pub fn new(ctx: Arc<AppContext>, config: DaemonConfig) -> Self {
        Self {
            ctx,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run until a shutdown signal or [`stop`](Self::stop).
    pub async fn run(&self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            shutdown.notify_one();
        });

        info!(
            "orgrelay daemon started (sync every {}, cleanup every {}, PID: {})",
            DaemonConfig::format_interval(self.config.sync_interval_secs),
            DaemonConfig::format_interval(self.config.cleanup_interval_secs),
            std::process::id()
        );

        if self.config.update_on_start {
            info!("Running initial sync...");
            self.ctx.engine.run_cycle().await;
        }

        let mut sync_timer = interval(Duration::from_secs(self.config.sync_interval_secs.max(1)));
        sync_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        sync_timer.tick().await; // Skip the first immediate tick

        let mut cleanup_timer =
            interval(Duration::from_secs(self.config.cleanup_interval_secs.max(1)));
        cleanup_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        cleanup_timer.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = sync_timer.tick() => {
                    let engine = self.ctx.engine.clone();
                    // A cycle that overruns the interval makes the next tick a no-op.
                    tokio::spawn(async move {
                        engine.run_cycle().await;
                    });
                }
                _ = cleanup_timer.tick() => self.run_cleanup(),
            }
        }

        info!("Daemon shutting down...");
        self.ctx.notifier.shutdown().await;
        Ok(())
    }

    fn run_cleanup(&self) {
        match self.ctx.engine.cleanup_stale_feeds(Utc::now()) {
            Ok(removed) if removed.is_empty() => info!("No stale feeds"),
            Ok(removed) => info!("Removed {} stale feeds", removed.len()),
            Err(e) => error!("Stale feed cleanup failed: {}", e),
        }
    }

    /// Stop the daemon (called externally)
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
        }
        _ => {
            warn!("Failed to install signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
