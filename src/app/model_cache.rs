use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::adapters::ModelCacheStore;
use crate::app::download::ModelDownload;
use crate::app::download_queue::{ModelDownloadQueue, QueueEvent};
use crate::domain::url::is_local_url;
use crate::domain::{CachedModel, CachedModelSource, DomainError, ModelDetails};
use crate::infrastructure::paths::copy_dir_all;
use crate::infrastructure::{dir_size, is_path_within_directory, remove_path_within};
use crate::ports::{ExternalModelProvider, HttpClient, ModelFileSource};

/// Cache façade composing the manifest store and the download queue.
///
/// Completed repository downloads are registered in the store before the
/// queue releases them, so a finished download is always a cache hit.
pub struct ModelCache {
    store: Arc<RwLock<Arc<ModelCacheStore>>>,
    queue: Arc<ModelDownloadQueue>,
}

impl ModelCache {
    /// Open the cache rooted at `cache_dir`.
    pub fn create_for_app(
        cache_dir: impl Into<PathBuf>,
        source: Arc<dyn ModelFileSource>,
        http: Arc<dyn HttpClient>,
        providers: Vec<Arc<dyn ExternalModelProvider>>,
    ) -> Result<Arc<Self>, DomainError> {
        let cache_dir = cache_dir.into();
        let store = Arc::new(RwLock::new(Arc::new(ModelCacheStore::create_for_app(&cache_dir)?)));
        let queue = Arc::new(ModelDownloadQueue::new(&cache_dir, source, http, providers));

        let registry = Arc::clone(&store);
        queue.set_completion_hook(Arc::new(move |cached: &CachedModel| {
            let store = registry.read().clone();
            store.add_model(cached.clone()).map(|_| ())
        }));

        Ok(Arc::new(Self { store, queue }))
    }

    /// Current manifest store.
    pub fn store(&self) -> Arc<ModelCacheStore> {
        self.store.read().clone()
    }

    pub fn queue(&self) -> &Arc<ModelDownloadQueue> {
        &self.queue
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.store().cache_dir().to_path_buf()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    pub fn models(&self) -> Vec<CachedModel> {
        self.store().models()
    }

    pub fn is_model_cached(&self, url: &str) -> bool {
        self.store().contains_url(url)
    }

    pub fn get_cached_model(&self, url: &str) -> Option<CachedModel> {
        self.store().get_by_url(url)
    }

    pub fn get_cached_model_by_path(&self, path: &Path) -> Option<CachedModel> {
        self.store().get_by_path(path)
    }

    /// Queue `details` for download.
    ///
    /// Returns `None` when the model is already cached, otherwise the new or
    /// in-flight download for its URL.
    pub fn add_model_to_download_queue(
        &self,
        details: ModelDetails,
    ) -> Result<Option<Arc<ModelDownload>>, DomainError> {
        if self.is_model_cached(&details.url) {
            debug!(url = %details.url, "Model already cached, nothing to download");
            return Ok(None);
        }
        self.queue.add_model(details).map(Some)
    }

    /// Remove a model from the manifest and delete its files.
    ///
    /// Files of user-added local models are left in place. Disk deletion
    /// failures are logged, not returned. Returns whether an entry existed.
    pub fn delete_model_from_cache(&self, url: &str) -> Result<bool, DomainError> {
        let store = self.store();
        let Some(cached) = store.remove_model(url)? else {
            debug!(url = url, "Model not in cache");
            return Ok(false);
        };

        if cached.source == CachedModelSource::Local {
            info!(url = %cached.url, "Removed local model from cache, files kept");
            return Ok(true);
        }

        match remove_path_within(store.cache_dir(), &cached.path) {
            Ok(_) => info!(url = %cached.url, path = ?cached.path, "Deleted cached model"),
            Err(e) => warn!(url = %cached.url, path = ?cached.path, error = %e, "Failed to delete cached model files"),
        }
        Ok(true)
    }

    /// Register a model that already exists on disk at `path`.
    ///
    /// A blank URL becomes a `local-file:///` URL for the path. Non-local URLs
    /// are rejected since those models are downloaded instead.
    pub fn add_local_model_to_cache(
        &self,
        mut details: ModelDetails,
        path: &Path,
    ) -> Result<CachedModel, DomainError> {
        if !path.exists() {
            return Err(DomainError::NotFound(path.display().to_string()));
        }

        if details.url.trim().is_empty() {
            let normalized = path.to_string_lossy().replace('\\', "/");
            details.url = format!("local-file:///{}", normalized.trim_start_matches('/'));
        } else if !is_local_url(&details.url) {
            return Err(DomainError::invalid_argument(
                "url",
                "local models must use a local URL",
            ));
        }

        let size = dir_size(path);
        details.size = size;
        details.is_user_added = true;

        let cached = CachedModel::new(details, path, path.is_file(), size);
        self.store().add_model(cached.clone())?;
        info!(url = %cached.url, path = ?path, size = size, "Local model added to cache");
        Ok(cached)
    }

    /// Cancel all downloads, delete the cache root and empty the manifest.
    pub fn clear_cache(&self) -> Result<(), DomainError> {
        self.queue.cancel_all();

        let store = self.store();
        let cache_dir = store.cache_dir();
        if cache_dir.exists() {
            if let Err(e) = fs::remove_dir_all(cache_dir) {
                warn!(path = ?cache_dir, error = %e, "Failed to delete cache directory");
            }
        }

        store.clear()?;
        info!(path = ?cache_dir, "Cache cleared");
        Ok(())
    }

    /// Point the cache at another folder, loading whatever manifest it holds.
    ///
    /// In-flight downloads target the old folder and are canceled.
    pub fn set_cache_folder(&self, cache_dir: impl Into<PathBuf>) -> Result<(), DomainError> {
        let cache_dir = cache_dir.into();
        self.queue.cancel_all();

        let store = ModelCacheStore::create_for_app(&cache_dir)?;
        *self.store.write() = Arc::new(store);
        self.queue.set_cache_dir(&cache_dir);

        info!(path = ?cache_dir, "Cache folder changed");
        Ok(())
    }

    /// Move the cache folder to `destination` and re-root onto it.
    ///
    /// The destination must be missing or empty and must not lie inside the
    /// current cache. Renames when possible and copies otherwise.
    pub fn move_cache(&self, destination: impl Into<PathBuf>) -> Result<(), DomainError> {
        let destination = destination.into();
        let current = self.store();
        let source = current.cache_dir().to_path_buf();

        if is_path_within_directory(&source, &destination) {
            return Err(DomainError::invalid_argument(
                "destination",
                "destination is inside the current cache folder",
            ));
        }
        if destination.exists() && fs::read_dir(&destination)?.next().is_some() {
            return Err(DomainError::invalid_argument(
                "destination",
                format!("{} is not empty", destination.display()),
            ));
        }

        self.queue.cancel_all();

        if source.exists() {
            if destination.exists() {
                fs::remove_dir(&destination)?;
            }
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }

            if let Err(e) = fs::rename(&source, &destination) {
                debug!(error = %e, "Rename failed, copying cache folder");
                copy_dir_all(&source, &destination)?;
                if let Err(e) = fs::remove_dir_all(&source) {
                    warn!(path = ?source, error = %e, "Failed to remove old cache folder");
                }
            }
        }

        let models = current
            .models()
            .into_iter()
            .map(|mut model| {
                if let Ok(relative) = model.path.strip_prefix(&source) {
                    model.path = destination.join(relative);
                }
                model
            })
            .collect();

        let store = ModelCacheStore::create_with_models(&destination, models)?;
        *self.store.write() = Arc::new(store);
        self.queue.set_cache_dir(&destination);

        info!(from = ?source, to = ?destination, "Cache folder moved");
        Ok(())
    }
}
