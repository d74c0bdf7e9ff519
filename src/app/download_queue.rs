use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::app::download::{DownloadEvent, ModelDownload};
use crate::domain::url::is_local_url;
use crate::domain::{CachedModel, DomainError, DownloadStatus, ModelDetails, ModelUrl};
use crate::ports::{ExternalModelProvider, HttpClient, ModelFileSource};

/// Notifications raised by the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// A download was added or removed.
    ModelsChanged { count: usize },
    /// Re-broadcast of a download's state change.
    Progress {
        url: String,
        progress: f32,
        status: DownloadStatus,
    },
    /// A download reached `Completed`. Repository downloads carry their
    /// cache entry; external providers keep their own storage and carry none.
    ModelDownloadCompleted {
        url: String,
        cached: Option<CachedModel>,
    },
    /// A download ended in `Failed`.
    ModelDownloadFailed { url: String, error: String },
}

/// Called with every completed repository download before it leaves the queue.
pub type CompletionHook = Arc<dyn Fn(&CachedModel) -> Result<(), DomainError> + Send + Sync>;

#[derive(Default)]
struct Registry {
    active: HashMap<String, Arc<ModelDownload>>,
    /// Canceled downloads still removing their partial files.
    retiring: HashMap<String, Arc<ModelDownload>>,
}

/// In-memory registry of active downloads keyed by normalized URL.
///
/// At most one download exists per URL; adding a URL that is already queued
/// returns the existing download. A URL re-added right after a cancel starts
/// fresh, but waits for the canceled download to finish its cleanup before
/// touching the model directory.
pub struct ModelDownloadQueue {
    cache_dir: RwLock<PathBuf>,
    source: Arc<dyn ModelFileSource>,
    http: Arc<dyn HttpClient>,
    providers: Vec<Arc<dyn ExternalModelProvider>>,
    registry: Mutex<Registry>,
    on_completed: RwLock<Option<CompletionHook>>,
    events: broadcast::Sender<QueueEvent>,
}

impl ModelDownloadQueue {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        source: Arc<dyn ModelFileSource>,
        http: Arc<dyn HttpClient>,
        providers: Vec<Arc<dyn ExternalModelProvider>>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            cache_dir: RwLock::new(cache_dir.into()),
            source,
            http,
            providers,
            registry: Mutex::new(Registry::default()),
            on_completed: RwLock::new(None),
            events,
        }
    }

    /// Install the hook run for each completed repository download.
    pub fn set_completion_hook(&self, hook: CompletionHook) {
        *self.on_completed.write() = Some(hook);
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.read().clone()
    }

    /// Direct future downloads into `cache_dir`.
    pub fn set_cache_dir(&self, cache_dir: impl Into<PathBuf>) {
        *self.cache_dir.write() = cache_dir.into();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    fn create_download(&self, details: ModelDetails) -> Result<ModelDownload, DomainError> {
        if let Some(provider) = self.providers.iter().find(|p| p.handles(&details.url)) {
            debug!(url = %details.url, provider = provider.name(), "Using external provider");
            return Ok(ModelDownload::external(details, Arc::clone(provider)));
        }

        if is_local_url(&details.url) {
            return Err(DomainError::invalid_argument(
                "url",
                "local models are added to the cache, not downloaded",
            ));
        }

        ModelDownload::repository(
            details,
            self.cache_dir(),
            Arc::clone(&self.source),
            Arc::clone(&self.http),
        )
    }

    /// Enqueue `details`, or return the download already registered for its URL.
    ///
    /// A new download starts on the runtime as soon as any canceled
    /// predecessor for the same URL has cleaned up. URL errors are reported
    /// here, before anything is registered.
    pub fn add_model(self: &Arc<Self>, details: ModelDetails) -> Result<Arc<ModelDownload>, DomainError> {
        let url = ModelUrl::full_url_for(&details.url);

        let (download, previous, count) = {
            let mut registry = self.registry.lock();
            if let Some(existing) = registry.active.get(&url) {
                debug!(url = %url, "Download already queued");
                return Ok(Arc::clone(existing));
            }

            let download = Arc::new(self.create_download(details)?);
            let previous = registry.retiring.remove(&url);
            registry.active.insert(url.clone(), Arc::clone(&download));
            (download, previous, registry.active.len())
        };

        info!(url = %url, "Model download enqueued");
        self.notify(QueueEvent::ModelsChanged { count });

        let queue = Arc::clone(self);
        let running = Arc::clone(&download);
        tokio::spawn(async move {
            if let Some(previous) = previous {
                debug!(url = %running.url(), "Waiting for canceled download to clean up");
                previous.wait().await;
            }
            queue.run(running).await
        });

        Ok(download)
    }

    async fn run(&self, download: Arc<ModelDownload>) {
        let mut events = download.subscribe();
        let transfer = download.start();
        tokio::pin!(transfer);

        let result = loop {
            tokio::select! {
                result = &mut transfer => break result,
                event = events.recv() => match event {
                    Ok(event) => self.forward(event),
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "Progress events skipped"),
                    Err(RecvError::Closed) => {}
                },
            }
        };
        while let Ok(event) = events.try_recv() {
            self.forward(event);
        }

        match result {
            Ok(cached) => {
                if let Some(cached) = &cached {
                    let hook = self.on_completed.read().clone();
                    if let Some(hook) = hook {
                        if let Err(e) = hook(cached) {
                            error!(url = %cached.url, error = %e, "Failed to register completed download");
                        }
                    }
                }
                self.notify(QueueEvent::ModelDownloadCompleted {
                    url: download.url().to_string(),
                    cached,
                });
            }
            Err(DomainError::Canceled) => {
                debug!(url = %download.url(), "Download ended by cancellation");
            }
            Err(e) => {
                error!(url = %download.url(), error = %e, "Model download failed");
                self.notify(QueueEvent::ModelDownloadFailed {
                    url: download.url().to_string(),
                    error: e.to_string(),
                });
            }
        }

        self.release(&download);
        download.finish();
    }

    fn forward(&self, event: DownloadEvent) {
        if let DownloadEvent::StateChanged(state) = event {
            self.notify(QueueEvent::Progress {
                url: state.url,
                progress: state.progress,
                status: state.status,
            });
        }
    }

    /// Drop a finished download from both maps.
    fn release(&self, download: &Arc<ModelDownload>) {
        let count = {
            let mut registry = self.registry.lock();
            if registry
                .retiring
                .get(download.url())
                .is_some_and(|retiring| Arc::ptr_eq(retiring, download))
            {
                registry.retiring.remove(download.url());
            }
            take_if_current(&mut registry.active, download).then(|| registry.active.len())
        };
        if let Some(count) = count {
            self.notify(QueueEvent::ModelsChanged { count });
        }
    }

    /// Look up the download for `url`.
    pub fn get_download(&self, url: &str) -> Option<Arc<ModelDownload>> {
        let url = ModelUrl::full_url_for(url);
        self.registry.lock().active.get(&url).cloned()
    }

    /// Snapshot of every tracked download.
    pub fn get_downloads(&self) -> Vec<Arc<ModelDownload>> {
        self.registry.lock().active.values().cloned().collect()
    }

    /// Cancel `download` and deregister it so a later add starts fresh.
    pub fn cancel_download(&self, download: &Arc<ModelDownload>) {
        download.cancel_download();

        let count = {
            let mut registry = self.registry.lock();
            if take_if_current(&mut registry.active, download) {
                // The task still owns its partial files until it finishes
                registry
                    .retiring
                    .insert(download.url().to_string(), Arc::clone(download));
                Some(registry.active.len())
            } else {
                None
            }
        };
        if let Some(count) = count {
            self.notify(QueueEvent::ModelsChanged { count });
        }

        info!(url = %download.url(), "Model download canceled");
        self.notify(QueueEvent::Progress {
            url: download.url().to_string(),
            progress: 0.0,
            status: DownloadStatus::Canceled,
        });
    }

    /// Cancel the download registered for `url`. Returns whether one existed.
    pub fn cancel_model_download(&self, url: &str) -> bool {
        match self.get_download(url) {
            Some(download) => {
                self.cancel_download(&download);
                true
            }
            None => {
                warn!(url = url, "No download to cancel");
                false
            }
        }
    }

    /// Cancel everything in flight.
    pub fn cancel_all(&self) {
        for download in self.get_downloads() {
            self.cancel_download(&download);
        }
    }
}

/// Remove `download` from `map` if it is the entry registered for its URL.
fn take_if_current(map: &mut HashMap<String, Arc<ModelDownload>>, download: &Arc<ModelDownload>) -> bool {
    let current = map
        .get(download.url())
        .is_some_and(|entry| Arc::ptr_eq(entry, download));
    if current {
        map.remove(download.url());
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::download::tests::{
        remote_file, FakeHttp, FakeProvider, PendingSource, StallingHttp, StaticSource,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    fn details(url: &str) -> ModelDetails {
        let mut details = ModelDetails::new("m", "Model", url);
        details.size = 4;
        details
    }

    fn pending_queue(temp: &TempDir) -> Arc<ModelDownloadQueue> {
        Arc::new(ModelDownloadQueue::new(
            temp.path(),
            Arc::new(PendingSource),
            Arc::new(FakeHttp { body: Vec::new() }),
            Vec::new(),
        ))
    }

    #[tokio::test]
    async fn test_add_model_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let queue = pending_queue(&temp);

        let first = queue.add_model(details("org/repo")).unwrap();
        let second = queue.add_model(details("https://huggingface.co/org/repo/tree/main")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(queue.get_downloads().len(), 1);
        queue.cancel_all();
    }

    #[tokio::test]
    async fn test_concurrent_adds_collapse_to_one() {
        let temp = TempDir::new().unwrap();
        let queue = pending_queue(&temp);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move { queue.add_model(details("org/repo")).unwrap() }));
        }
        let mut downloads = Vec::new();
        for handle in handles {
            downloads.push(handle.await.unwrap());
        }

        assert!(downloads.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(queue.get_downloads().len(), 1);
        queue.cancel_all();
    }

    #[tokio::test]
    async fn test_cancel_removes_entry() {
        let temp = TempDir::new().unwrap();
        let queue = pending_queue(&temp);
        let mut events = queue.subscribe();

        let download = queue.add_model(details("org/repo")).unwrap();
        queue.add_model(details("org/other")).unwrap();

        assert!(queue.cancel_model_download("org/repo"));
        assert!(queue.get_download("org/repo").is_none());
        assert_eq!(queue.get_downloads().len(), 1);
        assert_eq!(download.status(), DownloadStatus::Canceled);

        assert_eq!(download.wait().await, DownloadStatus::Canceled);

        // A fresh add creates a new download rather than reviving the old one
        let again = queue.add_model(details("org/repo")).unwrap();
        assert!(!Arc::ptr_eq(&download, &again));

        let mut saw_canceled = false;
        while let Ok(event) = events.try_recv() {
            if let QueueEvent::Progress { status: DownloadStatus::Canceled, .. } = event {
                saw_canceled = true;
            }
        }
        assert!(saw_canceled);
        queue.cancel_all();
    }

    #[tokio::test]
    async fn test_completed_download_runs_hook_and_leaves_queue() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(ModelDownloadQueue::new(
            temp.path(),
            Arc::new(StaticSource(vec![remote_file("model.onnx", 4, None)])),
            Arc::new(FakeHttp { body: b"data".to_vec() }),
            Vec::new(),
        ));
        let registered: Arc<Mutex<Vec<CachedModel>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&registered);
        queue.set_completion_hook(Arc::new(move |cached: &CachedModel| {
            sink.lock().push(cached.clone());
            Ok(())
        }));
        let mut events = queue.subscribe();

        let download = queue.add_model(details("org/repo")).unwrap();
        assert_eq!(download.wait().await, DownloadStatus::Completed);

        assert!(queue.get_download("org/repo").is_none());
        assert_eq!(registered.lock().len(), 1);

        let mut completed = false;
        let mut progress_ticks = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                QueueEvent::ModelDownloadCompleted { url, cached } => {
                    assert_eq!(url, "https://huggingface.co/org/repo/tree/main");
                    assert_eq!(cached.unwrap().url, url);
                    completed = true;
                }
                QueueEvent::Progress { .. } => progress_ticks += 1,
                _ => {}
            }
        }
        assert!(completed);
        assert!(progress_ticks > 0);
    }

    #[tokio::test]
    async fn test_failed_download_is_reported() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(ModelDownloadQueue::new(
            temp.path(),
            Arc::new(StaticSource(Vec::new())),
            Arc::new(FakeHttp { body: Vec::new() }),
            Vec::new(),
        ));
        let mut events = queue.subscribe();

        let download = queue.add_model(details("org/repo")).unwrap();
        assert_eq!(download.wait().await, DownloadStatus::Failed);
        assert!(queue.get_downloads().is_empty());

        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, QueueEvent::ModelDownloadFailed { .. }) {
                failed = true;
            }
        }
        assert!(failed);
    }

    #[tokio::test]
    async fn test_invalid_urls_are_rejected() {
        let temp = TempDir::new().unwrap();
        let queue = pending_queue(&temp);

        assert!(queue.add_model(details("local-file:///models/x")).unwrap_err().is_argument_error());
        assert!(queue.add_model(details("https://huggingface.co/only-org")).is_err());
        assert!(queue.get_downloads().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readd_after_cancel_keeps_new_files() {
        let temp = TempDir::new().unwrap();
        let http = Arc::new(StallingHttp::new(b"data", "b.bin", Duration::from_millis(300)));
        let queue = Arc::new(ModelDownloadQueue::new(
            temp.path(),
            Arc::new(StaticSource(vec![
                remote_file("a.bin", 4, None),
                remote_file("b.bin", 4, None),
            ])),
            http.clone(),
            Vec::new(),
        ));

        let first = queue.add_model(details("org/repo")).unwrap();
        http.stalled.notified().await;

        queue.cancel_download(&first);
        assert!(queue.get_download("org/repo").is_none());

        let fresh = queue.add_model(details("org/repo")).unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(fresh.status(), DownloadStatus::Waiting);

        assert_eq!(fresh.wait().await, DownloadStatus::Completed);
        assert_eq!(first.wait().await, DownloadStatus::Canceled);

        let model_dir = temp.path().join("org--repo").join("main");
        assert!(model_dir.join("a.bin").exists());
        assert!(model_dir.join("b.bin").exists());
        assert!(queue.get_downloads().is_empty());
    }

    #[tokio::test]
    async fn test_external_completion_is_announced() {
        let temp = TempDir::new().unwrap();
        let provider: Arc<dyn ExternalModelProvider> = Arc::new(FakeProvider { outcome: Ok(None) });
        let queue = Arc::new(ModelDownloadQueue::new(
            temp.path(),
            Arc::new(StaticSource(Vec::new())),
            Arc::new(FakeHttp { body: Vec::new() }),
            vec![provider],
        ));
        let mut events = queue.subscribe();

        let download = queue.add_model(details("fake://phi3:mini")).unwrap();
        assert_eq!(download.wait().await, DownloadStatus::Completed);

        let mut completed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let QueueEvent::ModelDownloadCompleted { url, cached } = event {
                completed.push((url, cached));
            }
        }
        assert_eq!(completed, vec![("fake://phi3:mini".to_string(), None)]);
    }
}
