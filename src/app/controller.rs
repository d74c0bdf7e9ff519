use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::adapters::{GuardedHttpClient, OllamaProvider, RemoteModelFiles, TomlConfigStore};
use crate::app::model_cache::ModelCache;
use crate::domain::{AppConfig, DomainError, ModelDetails};
use crate::infrastructure::init_logging;
use crate::ports::{ConfigStore, ExternalModelProvider, HttpClient};

/// Application paths information.
#[derive(Debug, Clone, Serialize)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_path: PathBuf,
    pub cache_dir: PathBuf,
}

/// Application controller that orchestrates initialization and owns the
/// long-lived services.
pub struct AppController {
    config: RwLock<AppConfig>,
    config_store: Arc<dyn ConfigStore>,
    http: Arc<GuardedHttpClient>,
    providers: Vec<Arc<dyn ExternalModelProvider>>,
    cache: Arc<ModelCache>,
    _log_guard: Option<WorkerGuard>,
}

impl AppController {
    /// Initialize from the configuration in the OS application directory.
    pub fn new() -> Result<Self, DomainError> {
        let config_store = Arc::new(TomlConfigStore::new()?);
        Self::from_store(config_store)
    }

    /// Initialize configuration, logging, networking and the cache.
    pub fn from_store(config_store: Arc<dyn ConfigStore>) -> Result<Self, DomainError> {
        // Step 1: Load configuration
        let config = config_store.load()?;

        // Step 2: Initialize logging
        let log_guard = init_logging(&config_store.logs_dir(), &config.logging)?;

        info!(version = env!("CARGO_PKG_VERSION"), "ModelCache starting up");

        // Step 3: Network access goes through one guarded client
        let http = Arc::new(GuardedHttpClient::new(&config.network, &config.download)?);
        let source = Arc::new(RemoteModelFiles::new(
            http.clone(),
            &config.network,
            config.download.max_directory_fetches,
        ));

        // Step 4: Providers are built once and shared
        let providers: Vec<Arc<dyn ExternalModelProvider>> = vec![Arc::new(OllamaProvider::new())];

        // Step 5: Open the cache
        let cache_dir = config
            .cache
            .cache_dir
            .clone()
            .unwrap_or_else(|| config_store.default_cache_dir());
        let cache = ModelCache::create_for_app(&cache_dir, source, http.clone(), providers.clone())?;

        info!(
            cache_dir = ?cache_dir,
            local_only = config.network.local_only,
            "AppController initialized"
        );

        Ok(Self {
            config: RwLock::new(config),
            config_store,
            http,
            providers,
            cache,
            _log_guard: log_guard,
        })
    }

    /// Get the current configuration.
    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Apply and persist a new configuration.
    ///
    /// A changed cache folder re-roots the cache, canceling active downloads.
    pub fn update_config(&self, config: AppConfig) -> Result<(), DomainError> {
        self.http.set_local_only(config.network.local_only);
        self.http.set_allowed_domains(config.network.allowed_domains.clone());

        if config.cache.cache_dir != self.config.read().cache.cache_dir {
            let cache_dir = config
                .cache
                .cache_dir
                .clone()
                .unwrap_or_else(|| self.config_store.default_cache_dir());
            self.cache.set_cache_folder(cache_dir)?;
        }

        self.config_store.save(&config)?;
        *self.config.write() = config;

        info!("Configuration updated");
        Ok(())
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub fn providers(&self) -> &[Arc<dyn ExternalModelProvider>] {
        &self.providers
    }

    /// Models offered by every provider that is currently reachable.
    pub async fn provider_models(&self) -> Vec<ModelDetails> {
        let mut models = Vec::new();
        for provider in &self.providers {
            if !provider.is_ready().await {
                debug!(provider = provider.name(), "Provider not ready, skipping");
                continue;
            }
            match provider.list_models().await {
                Ok(found) => models.extend(found),
                Err(e) => warn!(provider = provider.name(), error = %e, "Failed to list provider models"),
            }
        }
        models
    }

    /// Check if network is currently blocked.
    pub fn is_network_blocked(&self) -> bool {
        self.http.is_network_blocked()
    }

    /// Switch to another cache folder and remember it.
    pub fn set_cache_folder(&self, cache_dir: impl Into<PathBuf>) -> Result<(), DomainError> {
        let cache_dir = cache_dir.into();
        self.cache.set_cache_folder(&cache_dir)?;
        self.persist_cache_dir(cache_dir)
    }

    /// Move the cache folder and remember the new location.
    pub fn move_cache(&self, destination: impl Into<PathBuf>) -> Result<(), DomainError> {
        let destination = destination.into();
        self.cache.move_cache(&destination)?;
        self.persist_cache_dir(destination)
    }

    fn persist_cache_dir(&self, cache_dir: PathBuf) -> Result<(), DomainError> {
        let mut config = self.config.write();
        config.cache.cache_dir = Some(cache_dir);
        self.config_store.save(&config)
    }

    pub fn paths(&self) -> AppPaths {
        AppPaths {
            data_dir: self.config_store.data_dir(),
            logs_dir: self.config_store.logs_dir(),
            config_path: self.config_store.config_path(),
            cache_dir: self.cache.cache_dir(),
        }
    }
}
