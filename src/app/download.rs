//! A single model download and its state machine.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::filter_files;
use crate::domain::{
    AtomicDownloadStatus, CachedModel, DomainError, DownloadState, DownloadStatus, ModelDetails,
    ModelFileDetails, ModelUrl,
};
use crate::infrastructure::paths::remove_path_within;
use crate::infrastructure::transfer::calculate_sha256;
use crate::infrastructure::{is_path_within_directory, TransferProgress};
use crate::ports::{ExternalModelProvider, HttpClient, ModelFileSource};

/// Notifications raised by a download.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// Fired on every progress tick and every state transition.
    StateChanged(DownloadState),
    /// A downloaded file did not match its advertised size or hash.
    IntegrityFailed {
        url: String,
        file: String,
        verification: &'static str,
        expected: String,
        actual: String,
    },
}

/// How the bytes for a model are obtained.
enum DownloadKind {
    /// Files enumerated from a Hugging Face or GitHub repository.
    Repository {
        url: ModelUrl,
        cache_dir: PathBuf,
        source: Arc<dyn ModelFileSource>,
        http: Arc<dyn HttpClient>,
    },
    /// Delegated to a backend that manages its own storage.
    External(Arc<dyn ExternalModelProvider>),
}

/// One queued or in-flight model download.
pub struct ModelDownload {
    details: ModelDetails,
    url: String,
    kind: DownloadKind,
    status: AtomicDownloadStatus,
    progress: Mutex<f32>,
    warning: Mutex<Option<String>>,
    written: Mutex<Vec<PathBuf>>,
    cancel: CancellationToken,
    events: broadcast::Sender<DownloadEvent>,
    finished: AtomicBool,
    finished_notify: Notify,
}

impl std::fmt::Debug for ModelDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDownload")
            .field("details", &self.details)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl ModelDownload {
    /// A download of repository files into `cache_dir`.
    ///
    /// Fails with `InvalidArgument` when the URL cannot be parsed.
    pub fn repository(
        details: ModelDetails,
        cache_dir: impl Into<PathBuf>,
        source: Arc<dyn ModelFileSource>,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self, DomainError> {
        let url = ModelUrl::parse(&details.url)?;
        Ok(Self::with_kind(
            details,
            DownloadKind::Repository {
                url,
                cache_dir: cache_dir.into(),
                source,
                http,
            },
        ))
    }

    /// A download performed by an external provider.
    pub fn external(details: ModelDetails, provider: Arc<dyn ExternalModelProvider>) -> Self {
        Self::with_kind(details, DownloadKind::External(provider))
    }

    fn with_kind(details: ModelDetails, kind: DownloadKind) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            url: details.full_url(),
            details,
            kind,
            status: AtomicDownloadStatus::new(DownloadStatus::Waiting),
            progress: Mutex::new(0.0),
            warning: Mutex::new(None),
            written: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            events,
            finished: AtomicBool::new(false),
            finished_notify: Notify::new(),
        }
    }

    pub fn details(&self) -> &ModelDetails {
        &self.details
    }

    /// Normalized URL identifying this download.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> DownloadStatus {
        self.status.load()
    }

    pub fn progress(&self) -> f32 {
        *self.progress.lock()
    }

    pub fn warning_message(&self) -> Option<String> {
        self.warning.lock().clone()
    }

    pub fn state(&self) -> DownloadState {
        DownloadState {
            url: self.url.clone(),
            progress: self.progress(),
            status: self.status(),
            warning_message: self.warning_message(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    fn emit_state(&self) {
        let _ = self.events.send(DownloadEvent::StateChanged(self.state()));
    }

    fn set_progress(&self, progress: f32) {
        *self.progress.lock() = progress.clamp(0.0, 1.0);
        self.emit_state();
    }

    fn set_warning(&self, message: String) {
        *self.warning.lock() = Some(message);
        self.emit_state();
    }

    /// Request cancellation. Legal from any non-terminal state.
    ///
    /// Returns `false` when the download had already finished.
    pub fn cancel_download(&self) -> bool {
        self.cancel.cancel();
        match self.status.advance(DownloadStatus::Canceled) {
            Some(previous) => {
                info!(url = %self.url, from = %previous, "Download canceled");
                self.emit_state();
                true
            }
            None => false,
        }
    }

    /// Wait until the owning queue has finished processing this download.
    pub async fn wait(&self) -> DownloadStatus {
        loop {
            let notified = self.finished_notify.notified();
            if self.finished.load(Ordering::SeqCst) {
                return self.status();
            }
            notified.await;
        }
    }

    /// Mark post-processing (cache registration, deregistration) complete.
    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.finished_notify.notify_waiters();
    }

    /// Run the transfer to a terminal state.
    ///
    /// Returns the cache entry for repository downloads, `None` for external
    /// ones. Cancellation yields `Err(Canceled)` after partial files are
    /// removed.
    pub async fn start(&self) -> Result<Option<CachedModel>, DomainError> {
        if self.status.advance(DownloadStatus::InProgress).is_none() {
            debug!(url = %self.url, "Download canceled before it started");
            return Err(DomainError::Canceled);
        }
        info!(url = %self.url, "Download started");
        self.emit_state();

        let result = match &self.kind {
            DownloadKind::Repository {
                url,
                cache_dir,
                source,
                http,
            } => self
                .download_repository(url, cache_dir, source.as_ref(), http.as_ref())
                .await
                .map(Some),
            DownloadKind::External(provider) => self.download_external(provider.as_ref()).await.map(|_| None),
        };

        let result = match result {
            Ok(_) if self.cancel.is_cancelled() => Err(DomainError::Canceled),
            Err(_) if self.cancel.is_cancelled() => Err(DomainError::Canceled),
            other => other,
        };

        match result {
            Ok(cached) => {
                *self.progress.lock() = 1.0;
                if self.status.advance(DownloadStatus::Completed).is_none() {
                    // Lost a race with cancel_download
                    self.remove_partial_files().await;
                    return Err(DomainError::Canceled);
                }
                info!(
                    url = %self.url,
                    warning = ?self.warning_message(),
                    "Download completed"
                );
                self.emit_state();
                Ok(cached)
            }
            Err(DomainError::Canceled) => {
                self.cancel.cancel();
                if self.status.advance(DownloadStatus::Canceled).is_some() {
                    self.emit_state();
                }
                self.remove_partial_files().await;
                Err(DomainError::Canceled)
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Download failed");
                if self.status.advance(DownloadStatus::Failed).is_some() {
                    self.emit_state();
                }
                Err(e)
            }
        }
    }

    async fn download_external(&self, provider: &dyn ExternalModelProvider) -> Result<(), DomainError> {
        debug!(url = %self.url, provider = provider.name(), "Delegating download to provider");
        let report = move |p: f32| self.set_progress(p);

        if let Some(message) = provider.download(&self.details, Some(&report), &self.cancel).await? {
            self.set_warning(message);
        }
        Ok(())
    }

    async fn download_repository(
        &self,
        url: &ModelUrl,
        cache_dir: &Path,
        source: &dyn ModelFileSource,
        http: &dyn HttpClient,
    ) -> Result<CachedModel, DomainError> {
        let files = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DomainError::Canceled),
            files = source.list_files(url) => files,
        };

        let files = filter_files(files, self.details.file_filters.as_deref());
        if files.is_empty() {
            return Err(DomainError::NotFound(format!("no files to download for {}", self.url)));
        }

        let model_root = url.model_root(cache_dir);
        tokio::fs::create_dir_all(&model_root).await?;

        let total: u64 = files.iter().map(|f| f.size).sum();
        let fraction = |bytes: u64| if total == 0 { 0.0 } else { bytes as f32 / total as f32 };

        let mut completed: u64 = 0;
        let mut to_verify: Vec<(PathBuf, &ModelFileDetails)> = Vec::new();
        let mut failed_files: Vec<String> = Vec::new();

        for file in &files {
            if self.cancel.is_cancelled() {
                return Err(DomainError::Canceled);
            }

            let (Some(download_url), Some(relative)) = (file.download_url.as_deref(), file.path.as_deref()) else {
                continue;
            };

            let target = relative
                .split('/')
                .filter(|s| !s.is_empty())
                .fold(model_root.clone(), |path, part| path.join(part));
            if !is_path_within_directory(&model_root, &target) {
                warn!(url = %self.url, path = relative, "Remote file path escapes the model directory");
                return Err(DomainError::invalid_argument(
                    "path",
                    format!("{} escapes the model directory", relative),
                ));
            }

            let display_name = file.name.clone().unwrap_or_else(|| relative.to_string());
            let existing_len = tokio::fs::metadata(&target)
                .await
                .ok()
                .filter(|m| m.is_file())
                .map(|m| m.len());

            if existing_len == Some(file.size) {
                debug!(path = ?target, "File already present, skipping");
            } else {
                self.written.lock().push(target.clone());

                let base = completed;
                let report = move |p: TransferProgress| self.set_progress(fraction(base + p.bytes_read));
                http.download_file(download_url, &target, Some(&report), &self.cancel)
                    .await?;

                let actual = tokio::fs::metadata(&target).await?.len();
                if actual != file.size {
                    self.integrity_failure(&display_name, "Size", file.size.to_string(), actual.to_string());
                    failed_files.push(display_name.clone());
                }
            }

            completed += file.size;
            self.set_progress(fraction(completed));

            if file.should_verify_integrity() && file.has_verification_hash() {
                to_verify.push((target, file));
            }
        }

        for (path, file) in to_verify {
            if self.cancel.is_cancelled() {
                return Err(DomainError::Canceled);
            }

            let expected = file.sha256.clone().unwrap_or_default();
            let hash_path = path.clone();
            let actual = tokio::task::spawn_blocking(move || calculate_sha256(&hash_path))
                .await
                .map_err(|e| DomainError::Io(format!("hash task failed: {}", e)))??;

            if actual.eq_ignore_ascii_case(expected.trim()) {
                debug!(path = ?path, "Integrity verified");
            } else {
                let name = file
                    .name
                    .clone()
                    .unwrap_or_else(|| path.display().to_string());
                self.integrity_failure(&name, "SHA256", expected, actual);
                if !failed_files.contains(&name) {
                    failed_files.push(name);
                }
            }
        }

        if !failed_files.is_empty() {
            self.set_warning(format!(
                "Integrity verification failed for: {}",
                failed_files.join(", ")
            ));
        }

        let local = url.local_path(cache_dir);
        let (path, is_file) = match (url.is_file(), files[0].name.as_deref()) {
            (true, Some(name)) => (local.join(name), true),
            _ => (local, false),
        };

        Ok(CachedModel::new(self.details.clone(), path, is_file, total))
    }

    fn integrity_failure(&self, file: &str, verification: &'static str, expected: String, actual: String) {
        warn!(
            target: "modelcache::integrity",
            url = %self.url,
            file = file,
            verification = verification,
            expected = %expected,
            actual = %actual,
            "Model integrity verification failed"
        );
        let _ = self.events.send(DownloadEvent::IntegrityFailed {
            url: self.url.clone(),
            file: file.to_string(),
            verification,
            expected,
            actual,
        });
    }

    /// Delete files written by this download, confined to the model directory,
    /// then prune directories left empty.
    async fn remove_partial_files(&self) {
        let DownloadKind::Repository { url, cache_dir, .. } = &self.kind else {
            return;
        };

        let model_root = url.model_root(cache_dir);
        let written = std::mem::take(&mut *self.written.lock());
        for path in &written {
            match remove_path_within(&model_root, path) {
                Ok(true) => debug!(path = ?path, "Removed partial file"),
                Ok(false) => {}
                Err(e) => warn!(path = ?path, error = %e, "Failed to remove partial file"),
            }
            if let Some(parent) = path.parent() {
                prune_empty_dirs(parent, cache_dir).await;
            }
        }
        prune_empty_dirs(&model_root, cache_dir).await;
    }
}

/// Remove `directory` and its ancestors while they are empty, stopping at `root`.
async fn prune_empty_dirs(directory: &Path, root: &Path) {
    let mut directory = directory.to_path_buf();
    while directory.starts_with(root) && directory != root {
        if tokio::fs::remove_dir(&directory).await.is_err() {
            break;
        }
        match directory.parent() {
            Some(parent) => directory = parent.to_path_buf(),
            None => break,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use sha2::{Digest, Sha256};
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::ports::ProgressCallback;

    /// Serves a fixed file list.
    pub(crate) struct StaticSource(pub Vec<ModelFileDetails>);

    #[async_trait]
    impl ModelFileSource for StaticSource {
        async fn list_files(&self, _url: &ModelUrl) -> Vec<ModelFileDetails> {
            self.0.clone()
        }
    }

    /// Never finishes listing.
    pub(crate) struct PendingSource;

    #[async_trait]
    impl ModelFileSource for PendingSource {
        async fn list_files(&self, _url: &ModelUrl) -> Vec<ModelFileDetails> {
            std::future::pending().await
        }
    }

    /// Writes `body` for every URL, in two chunks.
    pub(crate) struct FakeHttp {
        pub body: Vec<u8>,
    }

    #[async_trait]
    impl HttpClient for FakeHttp {
        async fn get(&self, _url: &str) -> Result<String, DomainError> {
            Ok(String::new())
        }

        async fn download_file(
            &self,
            _url: &str,
            path: &Path,
            progress: Option<ProgressCallback<'_>>,
            cancel: &CancellationToken,
        ) -> Result<u64, DomainError> {
            if cancel.is_cancelled() {
                return Err(DomainError::Canceled);
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &self.body)?;
            let total = self.body.len() as u64;
            if let Some(report) = progress {
                report(TransferProgress {
                    bytes_read: total / 2,
                    total_bytes: Some(total),
                });
                report(TransferProgress {
                    bytes_read: total,
                    total_bytes: Some(total),
                });
            }
            Ok(total)
        }

        fn is_network_blocked(&self) -> bool {
            false
        }

        fn allowed_domains(&self) -> Vec<String> {
            Vec::new()
        }
    }

    /// Writes `body` for every URL. The first request for a URL ending in
    /// `stall_on` writes its file, then holds until canceled and lingers
    /// before returning, like a transfer that is slow to unwind.
    pub(crate) struct StallingHttp {
        pub body: Vec<u8>,
        pub stall_on: &'static str,
        pub linger: Duration,
        pub stalled: Notify,
        pub stalled_once: AtomicBool,
    }

    impl StallingHttp {
        pub(crate) fn new(body: &[u8], stall_on: &'static str, linger: Duration) -> Self {
            Self {
                body: body.to_vec(),
                stall_on,
                linger,
                stalled: Notify::new(),
                stalled_once: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl HttpClient for StallingHttp {
        async fn get(&self, _url: &str) -> Result<String, DomainError> {
            Ok(String::new())
        }

        async fn download_file(
            &self,
            url: &str,
            path: &Path,
            _progress: Option<ProgressCallback<'_>>,
            cancel: &CancellationToken,
        ) -> Result<u64, DomainError> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &self.body)?;

            if url.ends_with(self.stall_on) && !self.stalled_once.swap(true, Ordering::SeqCst) {
                self.stalled.notify_one();
                cancel.cancelled().await;
                tokio::time::sleep(self.linger).await;
                return Err(DomainError::Canceled);
            }
            Ok(self.body.len() as u64)
        }

        fn is_network_blocked(&self) -> bool {
            false
        }

        fn allowed_domains(&self) -> Vec<String> {
            Vec::new()
        }
    }

    pub(crate) fn sha256_hex(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    pub(crate) fn remote_file(path: &str, size: u64, sha256: Option<String>) -> ModelFileDetails {
        ModelFileDetails {
            download_url: Some(format!("https://huggingface.co/org/repo/resolve/main/{}", path)),
            size,
            name: ModelFileDetails::file_name_from_path(path),
            path: Some(path.to_string()),
            sha256,
        }
    }

    fn details() -> ModelDetails {
        let mut details = ModelDetails::new("phi", "Phi", "org/repo");
        details.size = 10;
        details
    }

    fn download_with(temp: &TempDir, files: Vec<ModelFileDetails>, body: &[u8]) -> ModelDownload {
        ModelDownload::repository(
            details(),
            temp.path(),
            Arc::new(StaticSource(files)),
            Arc::new(FakeHttp { body: body.to_vec() }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_successful_download_completes() {
        let temp = TempDir::new().unwrap();
        let body = b"0123456789";
        let download = download_with(
            &temp,
            vec![remote_file("onnx/model.onnx", 10, Some(sha256_hex(body)))],
            body,
        );
        let mut events = download.subscribe();

        let cached = download.start().await.unwrap().unwrap();

        assert_eq!(download.status(), DownloadStatus::Completed);
        assert_eq!(download.progress(), 1.0);
        assert!(download.warning_message().is_none());
        assert_eq!(cached.path, temp.path().join("org--repo").join("main"));
        assert!(!cached.is_file);
        assert_eq!(cached.size, 10);
        assert!(temp.path().join("org--repo/main/onnx/model.onnx").exists());

        let mut statuses = Vec::new();
        while let Ok(DownloadEvent::StateChanged(state)) = events.try_recv() {
            statuses.push(state.status);
        }
        assert_eq!(statuses.first(), Some(&DownloadStatus::InProgress));
        assert_eq!(statuses.last(), Some(&DownloadStatus::Completed));
        assert!(statuses.len() >= 4);
    }

    #[tokio::test]
    async fn test_hash_mismatch_completes_with_warning() {
        let temp = TempDir::new().unwrap();
        let download = download_with(
            &temp,
            vec![remote_file("model.onnx", 10, Some("ab".repeat(32)))],
            b"0123456789",
        );
        let mut events = download.subscribe();

        assert!(download.start().await.unwrap().is_some());
        assert_eq!(download.status(), DownloadStatus::Completed);
        let warning = download.warning_message().unwrap();
        assert!(warning.contains("model.onnx"));

        let mut saw_integrity = false;
        while let Ok(event) = events.try_recv() {
            if let DownloadEvent::IntegrityFailed { verification, .. } = event {
                assert_eq!(verification, "SHA256");
                saw_integrity = true;
            }
        }
        assert!(saw_integrity);
    }

    #[tokio::test]
    async fn test_size_mismatch_is_a_warning() {
        let temp = TempDir::new().unwrap();
        let download = download_with(&temp, vec![remote_file("config.json", 99, None)], b"tiny");

        download.start().await.unwrap();
        assert_eq!(download.status(), DownloadStatus::Completed);
        assert!(download.warning_message().unwrap().contains("config.json"));
    }

    #[tokio::test]
    async fn test_existing_file_with_matching_size_is_reused() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("org--repo/main/model.onnx");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"local copy").unwrap();

        // The fake server would write different bytes if asked
        let download = download_with(&temp, vec![remote_file("model.onnx", 10, None)], b"remote!!!!");
        download.start().await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"local copy");
    }

    #[tokio::test]
    async fn test_filters_leaving_nothing_fails() {
        let temp = TempDir::new().unwrap();
        let mut download = download_with(&temp, vec![remote_file("model.onnx", 10, None)], b"x");
        download.details.file_filters = Some(vec![".gguf".to_string()]);

        let result = download.start().await;
        assert!(matches!(result, Err(DomainError::NotFound(_))));
        assert_eq!(download.status(), DownloadStatus::Failed);
    }

    #[tokio::test]
    async fn test_escaping_remote_path_fails() {
        let temp = TempDir::new().unwrap();
        let download = download_with(&temp, vec![remote_file("../../evil.onnx", 1, None)], b"x");

        let result = download.start().await;
        assert!(result.unwrap_err().is_argument_error());
        assert_eq!(download.status(), DownloadStatus::Failed);
        assert!(!temp.path().join("evil.onnx").exists());
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let temp = TempDir::new().unwrap();
        let download = download_with(&temp, vec![remote_file("model.onnx", 1, None)], b"x");

        assert!(download.cancel_download());
        assert_eq!(download.status(), DownloadStatus::Canceled);
        assert!(matches!(download.start().await, Err(DomainError::Canceled)));
        assert!(!download.cancel_download());
    }

    #[tokio::test]
    async fn test_cancel_during_listing_cleans_up() {
        let temp = TempDir::new().unwrap();
        let download = Arc::new(
            ModelDownload::repository(
                details(),
                temp.path(),
                Arc::new(PendingSource),
                Arc::new(FakeHttp { body: Vec::new() }),
            )
            .unwrap(),
        );

        let running = Arc::clone(&download);
        let handle = tokio::spawn(async move { running.start().await });
        while download.status() == DownloadStatus::Waiting {
            tokio::task::yield_now().await;
        }

        // Listing never returns, so the transfer only ends through the token
        download.cancel_download();
        assert_eq!(download.status(), DownloadStatus::Canceled);

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(DomainError::Canceled)));
        assert_eq!(download.status(), DownloadStatus::Canceled);
        assert!(!temp.path().join("org--repo").exists());
    }

    #[tokio::test]
    async fn test_cancel_mid_transfer_removes_only_own_files() {
        let temp = TempDir::new().unwrap();
        let neighbour = temp.path().join("org--repo").join("dev").join("keep.onnx");
        let other_model = temp.path().join("org--other").join("main").join("model.onnx");
        for path in [&neighbour, &other_model] {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"cached").unwrap();
        }

        let http = Arc::new(StallingHttp::new(b"data", "b.bin", Duration::from_millis(20)));
        let download = Arc::new(
            ModelDownload::repository(
                details(),
                temp.path(),
                Arc::new(StaticSource(vec![
                    remote_file("a.bin", 4, None),
                    remote_file("sub/b.bin", 4, None),
                ])),
                http.clone(),
            )
            .unwrap(),
        );

        let running = Arc::clone(&download);
        let handle = tokio::spawn(async move { running.start().await });
        http.stalled.notified().await;

        let model_dir = temp.path().join("org--repo").join("main");
        assert!(model_dir.join("a.bin").exists());
        assert!(model_dir.join("sub").join("b.bin").exists());

        download.cancel_download();
        let result = handle.await.unwrap();

        assert!(matches!(result, Err(DomainError::Canceled)));
        assert_eq!(download.status(), DownloadStatus::Canceled);
        assert!(!model_dir.join("a.bin").exists());
        assert!(!model_dir.join("sub").join("b.bin").exists());
        assert!(!model_dir.exists());
        assert_eq!(std::fs::read(&neighbour).unwrap(), b"cached");
        assert_eq!(std::fs::read(&other_model).unwrap(), b"cached");
    }

    #[test]
    fn test_invalid_url_is_rejected_synchronously() {
        let details = ModelDetails::new("x", "x", "   ");
        let result = ModelDownload::repository(
            details,
            "/tmp",
            Arc::new(StaticSource(Vec::new())),
            Arc::new(FakeHttp { body: Vec::new() }),
        );
        assert!(matches!(result, Err(DomainError::InvalidArgument { .. })));
    }

    pub(crate) struct FakeProvider {
        pub outcome: Result<Option<String>, String>,
    }

    #[async_trait]
    impl ExternalModelProvider for FakeProvider {
        fn name(&self) -> &str {
            "Fake"
        }

        fn url_prefix(&self) -> &str {
            "fake://"
        }

        async fn is_ready(&self) -> bool {
            true
        }

        async fn list_models(&self) -> Result<Vec<ModelDetails>, DomainError> {
            Ok(Vec::new())
        }

        async fn download(
            &self,
            _details: &ModelDetails,
            progress: Option<&(dyn Fn(f32) + Send + Sync)>,
            _cancel: &CancellationToken,
        ) -> Result<Option<String>, DomainError> {
            if let Some(report) = progress {
                report(0.5);
            }
            self.outcome.clone().map_err(DomainError::Provider)
        }
    }

    #[tokio::test]
    async fn test_external_success_message_becomes_warning() {
        let provider = Arc::new(FakeProvider {
            outcome: Ok(Some("model cache is nearly full".to_string())),
        });
        let download = ModelDownload::external(ModelDetails::new("f", "f", "fake://model"), provider);

        assert!(download.start().await.unwrap().is_none());
        assert_eq!(download.status(), DownloadStatus::Completed);
        assert_eq!(download.warning_message().as_deref(), Some("model cache is nearly full"));
    }

    #[tokio::test]
    async fn test_external_failure_fails() {
        let provider = Arc::new(FakeProvider {
            outcome: Err("backend offline".to_string()),
        });
        let download = ModelDownload::external(ModelDetails::new("f", "f", "fake://model"), provider);

        assert!(matches!(download.start().await, Err(DomainError::Provider(_))));
        assert_eq!(download.status(), DownloadStatus::Failed);
    }
}
