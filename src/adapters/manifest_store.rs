use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::{CachedModel, DomainError, ModelUrl};

/// Manifest file name under the cache root.
pub const MANIFEST_FILE: &str = "cache.json";

/// Notifications raised after the manifest changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The set of cached models changed; carries the new count.
    ModelsChanged { count: usize },
}

/// Durable JSON manifest of cached models.
///
/// Every mutation persists before returning. The lock is held across the
/// in-memory change and the file write, so concurrent callers are serialized
/// and the file is replaced atomically.
pub struct ModelCacheStore {
    cache_dir: PathBuf,
    models: Mutex<Vec<CachedModel>>,
    events: broadcast::Sender<StoreEvent>,
}

impl ModelCacheStore {
    /// Load the manifest under `cache_dir`, dropping entries whose path no
    /// longer exists. The file is rewritten when anything was dropped.
    pub fn create_for_app(cache_dir: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let cache_dir = cache_dir.into();
        let manifest = cache_dir.join(MANIFEST_FILE);

        let (models, readable) = if manifest.exists() {
            match Self::read_manifest(&manifest) {
                Ok(models) => (models, true),
                Err(e) => {
                    warn!(path = ?manifest, error = %e, "Cache manifest unreadable, starting empty");
                    (Vec::new(), false)
                }
            }
        } else {
            (Vec::new(), true)
        };

        Self::from_models(cache_dir, models, !readable)
    }

    /// Build a store over `cache_dir` from an explicit list, validating and
    /// persisting it.
    pub fn create_with_models(
        cache_dir: impl Into<PathBuf>,
        models: Vec<CachedModel>,
    ) -> Result<Self, DomainError> {
        Self::from_models(cache_dir.into(), models, true)
    }

    fn from_models(
        cache_dir: PathBuf,
        models: Vec<CachedModel>,
        force_save: bool,
    ) -> Result<Self, DomainError> {
        let before = models.len();
        let models: Vec<CachedModel> = models
            .into_iter()
            .filter(|model| {
                let exists = model.path_exists();
                if !exists {
                    info!(url = %model.url, path = ?model.path, "Dropping cache entry with missing path");
                }
                exists
            })
            .collect();
        let pruned = before - models.len();

        let (events, _) = broadcast::channel(64);
        let store = Self {
            cache_dir,
            models: Mutex::new(models),
            events,
        };

        if pruned > 0 || force_save {
            let models = store.models.lock();
            store.save_locked(&models)?;
        }

        info!(
            cache_dir = ?store.cache_dir,
            models = store.models.lock().len(),
            pruned = pruned,
            "Model cache store loaded"
        );

        Ok(store)
    }

    fn read_manifest(path: &Path) -> Result<Vec<CachedModel>, DomainError> {
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the manifest. Callers hold the models lock.
    fn save_locked(&self, models: &[CachedModel]) -> Result<(), DomainError> {
        fs::create_dir_all(&self.cache_dir)?;

        let manifest = self.manifest_path();
        let temp = self.cache_dir.join(format!("{}.tmp", MANIFEST_FILE));
        let content = serde_json::to_string_pretty(models)?;

        fs::write(&temp, content)?;
        if let Err(e) = fs::rename(&temp, &manifest) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        debug!(path = ?manifest, models = models.len(), "Cache manifest saved");
        Ok(())
    }

    fn notify(&self, count: usize) {
        // No receivers is fine
        let _ = self.events.send(StoreEvent::ModelsChanged { count });
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.cache_dir.join(MANIFEST_FILE)
    }

    /// Snapshot of the cached models.
    pub fn models(&self) -> Vec<CachedModel> {
        self.models.lock().clone()
    }

    /// Look up a model by URL (normalized before comparison).
    pub fn get_by_url(&self, url: &str) -> Option<CachedModel> {
        let url = ModelUrl::full_url_for(url);
        self.models.lock().iter().find(|m| m.url == url).cloned()
    }

    pub fn get_by_path(&self, path: &Path) -> Option<CachedModel> {
        self.models.lock().iter().find(|m| m.path == path).cloned()
    }

    pub fn contains_url(&self, url: &str) -> bool {
        let url = ModelUrl::full_url_for(url);
        self.models.lock().iter().any(|m| m.url == url)
    }

    /// Add a model and persist. Returns `false` (and changes nothing) when a
    /// model with the same URL is already present.
    pub fn add_model(&self, model: CachedModel) -> Result<bool, DomainError> {
        let count = {
            let mut models = self.models.lock();
            if models.iter().any(|m| m.url == model.url) {
                debug!(url = %model.url, "Model already cached, skipping add");
                return Ok(false);
            }

            info!(url = %model.url, path = ?model.path, "Adding model to cache store");
            models.push(model);
            if let Err(e) = self.save_locked(&models) {
                models.pop();
                return Err(e);
            }
            models.len()
        };

        self.notify(count);
        Ok(true)
    }

    /// Remove the model with `url` and persist. Returns the removed entry.
    pub fn remove_model(&self, url: &str) -> Result<Option<CachedModel>, DomainError> {
        let url = ModelUrl::full_url_for(url);
        let (removed, count) = {
            let mut models = self.models.lock();
            let Some(index) = models.iter().position(|m| m.url == url) else {
                return Ok(None);
            };

            let removed = models.remove(index);
            if let Err(e) = self.save_locked(&models) {
                models.insert(index, removed);
                return Err(e);
            }
            (removed, models.len())
        };

        info!(url = %url, "Removed model from cache store");
        self.notify(count);
        Ok(Some(removed))
    }

    /// Remove every entry and persist.
    pub fn clear(&self) -> Result<(), DomainError> {
        {
            let mut models = self.models.lock();
            let previous = std::mem::take(&mut *models);
            if let Err(e) = self.save_locked(&models) {
                *models = previous;
                return Err(e);
            }
        }

        info!(cache_dir = ?self.cache_dir, "Cache store cleared");
        self.notify(0);
        Ok(())
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
