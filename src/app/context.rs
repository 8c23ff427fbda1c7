use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{RelayError, Result};
use crate::cache::CacheCoordinator;
use crate::config::Config;
use crate::fetcher::http_fetcher::HttpFetcher;
use crate::fetcher::Fetcher;
use crate::notify::{spawn_dispatcher, DispatcherHandle, NotificationBus};
use crate::query::Views;
use crate::store::sqlite::SqliteStore;
use crate::sync::{SyncEngine, SyncOptions};

/// Wires the store, fetcher, cache, notification path and sync engine.
///
/// Must be built inside a tokio runtime: the notification dispatcher is
/// spawned on construction.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub cache: Arc<CacheCoordinator>,
    pub bus: Arc<NotificationBus>,
    pub notifier: DispatcherHandle,
    pub engine: Arc<SyncEngine>,
    pub views: Views,
}

impl AppContext {
    /// `db_path` overrides `config.database`, which overrides the data directory.
    pub fn new(config: Config, db_path: Option<PathBuf>) -> Result<Self> {
        let db_path = match db_path.or_else(|| config.database.clone()) {
            Some(p) => p,
            None => Self::default_db_path()?,
        };
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Arc::new(SqliteStore::new(&db_path)?);
        let fetcher = Self::http_fetcher(&config)?;
        Ok(Self::assemble(config, store, fetcher))
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        let fetcher = Self::http_fetcher(&config)?;
        Ok(Self::assemble(config, store, fetcher))
    }

    pub fn with_fetcher(
        config: Config,
        store: Arc<SqliteStore>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
    ) -> Self {
        Self::assemble(config, store, fetcher)
    }

    fn http_fetcher(config: &Config) -> Result<Arc<dyn Fetcher + Send + Sync>> {
        Ok(Arc::new(HttpFetcher::with_options(
            config.sync.fetch_timeout(),
            config.sync.max_redirects,
            &config.sync.user_agent,
        )?))
    }

    fn assemble(
        config: Config,
        store: Arc<SqliteStore>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
    ) -> Self {
        let cache = Arc::new(CacheCoordinator::new());
        let bus = Arc::new(NotificationBus::new(config.notifications.channel_capacity));
        let notifier = spawn_dispatcher(bus.clone(), config.notifications.queue_capacity);
        let engine = Arc::new(
            SyncEngine::new(
                store.clone(),
                fetcher,
                cache.clone(),
                SyncOptions::from_config(&config),
            )
            .with_notifier(notifier.clone()),
        );
        let views = Views::new(store.clone(), cache.clone());

        Self {
            config,
            store,
            cache,
            bus,
            notifier,
            engine,
            views,
        }
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| RelayError::Config("Could not find data directory".into()))?;
        Ok(data_dir.join("orgrelay").join("relay.db"))
    }
}
