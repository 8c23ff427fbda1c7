use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orgrelay::app::AppContext;
use orgrelay::cli::{commands, Cli, Commands};
use orgrelay::config::Config;
use orgrelay::daemon::{Daemon, DaemonConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(workers) = cli.workers {
        config.sync.workers = workers.max(1);
    }
    let ctx = AppContext::new(config, cli.database)?;

    match cli.command {
        Commands::Add { url } => {
            commands::add_feed(&ctx, &url).await?;
        }
        Commands::Remove { url } => {
            commands::remove_feed(&ctx, &url)?;
        }
        Commands::List => {
            commands::list_feeds(&ctx)?;
        }
        Commands::Sync => {
            commands::sync_feeds(&ctx).await?;
        }
        Commands::Cleanup => {
            commands::cleanup(&ctx)?;
        }
        Commands::Replies { post } => {
            commands::show_replies(&ctx, &post)?;
        }
        Commands::Interactions { post } => {
            commands::show_interactions(&ctx, &post)?;
        }
        Commands::Notifications { feed, kind } => {
            commands::show_notifications(&ctx, &feed, kind.as_deref())?;
        }
        Commands::Polls { feed } => {
            commands::show_polls(&ctx, &feed)?;
        }
        Commands::Threads { feed } => {
            commands::show_threads(&ctx, &feed)?;
        }
        Commands::Daemon {
            interval,
            no_initial_update,
        } => {
            let mut daemon_config = daemon_config(&ctx, interval)?;
            daemon_config.update_on_start = !no_initial_update;

            Daemon::new(Arc::new(ctx), daemon_config).run().await?;
        }
        Commands::Watch { feed, interval } => {
            let daemon_config = daemon_config(&ctx, interval)?;
            let printer = commands::watch(&ctx, &feed);

            Daemon::new(Arc::new(ctx), daemon_config).run().await?;
            printer.abort();
        }
    }

    Ok(())
}

/// Daemon settings from the config file, with an optional `--interval` override.
fn daemon_config(ctx: &AppContext, interval: Option<String>) -> anyhow::Result<DaemonConfig> {
    let mut config = DaemonConfig::from_config(&ctx.config)?;
    if let Some(interval) = interval {
        config.sync_interval_secs = DaemonConfig::parse_interval(&interval).map_err(|e| anyhow!(e))?;
    }
    Ok(config)
}
