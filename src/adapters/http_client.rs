use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use parking_lot::RwLock;
use reqwest::Client;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::config::{DownloadConfig, NetworkConfig};
use crate::domain::DomainError;
use crate::infrastructure::{copy_with_progress, TransferProgress};
use crate::ports::{HttpClient, ProgressCallback};

/// Allow-listing HTTP client. Every request the cache makes goes through it.
///
/// In local-only mode all requests are blocked. Otherwise only hosts in the
/// allow list (or their subdomains) are reachable.
pub struct GuardedHttpClient {
    client: Client,
    local_only: AtomicBool,
    allowed_domains: RwLock<Vec<String>>,
    buffer_size: usize,
    download_timeout: Duration,
}

impl GuardedHttpClient {
    /// Create a client from the network and download configuration.
    pub fn new(network: &NetworkConfig, download: &DownloadConfig) -> Result<Self, DomainError> {
        let client = Client::builder()
            .use_rustls_tls()
            .user_agent(download.user_agent.clone())
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DomainError::HttpRequest(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            local_only = network.local_only,
            allowed_domains = ?network.allowed_domains,
            "HTTP client initialized"
        );

        Ok(Self {
            client,
            local_only: AtomicBool::new(network.local_only),
            allowed_domains: RwLock::new(network.allowed_domains.clone()),
            buffer_size: download.buffer_size,
            download_timeout: Duration::from_secs(download.request_timeout_secs),
        })
    }

    /// Set local-only mode.
    pub fn set_local_only(&self, local_only: bool) {
        let previous = self.local_only.swap(local_only, Ordering::SeqCst);
        if previous != local_only {
            info!(local_only = local_only, "Network mode changed");
        }
    }

    /// Update allowed domains.
    pub fn set_allowed_domains(&self, domains: Vec<String>) {
        let mut guard = self.allowed_domains.write();
        *guard = domains;
        info!(allowed_domains = ?*guard, "Allowed domains updated");
    }

    /// Check if a URL is allowed based on current settings.
    fn is_url_allowed(&self, url: &str) -> Result<(), DomainError> {
        if self.local_only.load(Ordering::SeqCst) {
            warn!(url = url, "Network request blocked: local-only mode enabled");
            return Err(DomainError::NetworkBlocked {
                reason: "Local-only mode is enabled. All network requests are blocked.".to_string(),
            });
        }

        let parsed = Url::parse(url).map_err(|e| DomainError::HttpRequest(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| DomainError::HttpRequest("Invalid URL: no host".to_string()))?;

        let allowed = self.allowed_domains.read();
        if !allowed
            .iter()
            .any(|d| host.eq_ignore_ascii_case(d) || host.ends_with(&format!(".{}", d)))
        {
            warn!(url = url, host = host, "Network request blocked: domain not in allow list");
            return Err(DomainError::NetworkBlocked {
                reason: format!("Domain '{}' is not in the allowed list", host),
            });
        }

        debug!(url = url, "Network request allowed");
        Ok(())
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response, DomainError> {
        let response = request
            .send()
            .await
            .map_err(|e| DomainError::HttpRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::HttpRequest(format!(
                "HTTP {} for {}",
                status, url
            )));
        }
        Ok(response)
    }

    async fn stream_to(
        &self,
        url: &str,
        temp_path: &Path,
        progress: Option<ProgressCallback<'_>>,
        cancel: &CancellationToken,
    ) -> Result<u64, DomainError> {
        let request = self.client.get(url).timeout(self.download_timeout);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DomainError::Canceled),
            response = self.send(request, url) => response?,
        };

        let total_bytes = response.content_length();
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = StreamReader::new(Box::pin(stream));

        let mut file = tokio::fs::File::create(temp_path).await?;

        let report = |bytes_read: u64| {
            if let Some(callback) = progress {
                callback(TransferProgress {
                    bytes_read,
                    total_bytes,
                });
            }
        };

        let written = copy_with_progress(
            Some(&mut reader),
            Some(&mut file),
            self.buffer_size,
            Some(&report),
            cancel,
        )
        .await?;

        if cancel.is_cancelled() {
            return Err(DomainError::Canceled);
        }

        if let Some(expected) = total_bytes {
            if written != expected {
                return Err(DomainError::TransferFailure(format!(
                    "received {} of {} bytes from {}",
                    written, expected, url
                )));
            }
        }

        Ok(written)
    }
}

/// Sibling path the body is streamed into before the final rename.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".download");
    path.with_file_name(name)
}

#[async_trait]
impl HttpClient for GuardedHttpClient {
    async fn get(&self, url: &str) -> Result<String, DomainError> {
        self.is_url_allowed(url)?;

        let response = self.send(self.client.get(url), url).await?;

        response
            .text()
            .await
            .map_err(|e| DomainError::HttpRequest(e.to_string()))
    }

    async fn download_file(
        &self,
        url: &str,
        path: &Path,
        progress: Option<ProgressCallback<'_>>,
        cancel: &CancellationToken,
    ) -> Result<u64, DomainError> {
        self.is_url_allowed(url)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = partial_path(path);

        let written = match self.stream_to(url, &temp_path, progress, cancel).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(DomainError::Io(e.to_string()));
        }

        debug!(path = ?path, size = written, "File downloaded");
        Ok(written)
    }

    fn is_network_blocked(&self) -> bool {
        self.local_only.load(Ordering::SeqCst)
    }

    fn allowed_domains(&self) -> Vec<String> {
        self.allowed_domains.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(local_only: bool, domains: &[&str]) -> GuardedHttpClient {
        let network = NetworkConfig {
            local_only,
            allowed_domains: domains.iter().map(|d| d.to_string()).collect(),
            ..NetworkConfig::default()
        };
        GuardedHttpClient::new(&network, &DownloadConfig::default()).unwrap()
    }

    #[test]
    fn test_local_only_blocks_requests() {
        let guard = client(true, &["example.com"]);
        assert!(guard.is_network_blocked());
        assert!(guard.is_url_allowed("https://example.com/api").is_err());
    }

    #[test]
    fn test_allowed_domain_passes() {
        let guard = client(false, &["huggingface.co"]);
        assert!(!guard.is_network_blocked());
        assert!(guard.is_url_allowed("https://huggingface.co/api/models").is_ok());
    }

    #[test]
    fn test_disallowed_domain_blocked() {
        let guard = client(false, &["huggingface.co"]);
        let result = guard.is_url_allowed("https://huggingface.co.evil.com/steal");
        assert!(matches!(result, Err(DomainError::NetworkBlocked { .. })));
    }

    #[test]
    fn test_subdomain_allowed() {
        let guard = client(false, &["huggingface.co"]);
        assert!(guard.is_url_allowed("https://cdn-lfs.huggingface.co/file").is_ok());
    }

    #[test]
    fn test_partial_path_keeps_extension() {
        assert_eq!(
            partial_path(Path::new("/cache/model.onnx")),
            PathBuf::from("/cache/model.onnx.download")
        );
    }

    #[tokio::test]
    async fn test_get_returns_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_string("world"))
            .mount(&mock_server)
            .await;

        let guard = client(false, &["127.0.0.1"]);
        let body = guard.get(&format!("{}/hello", mock_server.uri())).await.unwrap();
        assert_eq!(body, "world");
    }

    #[tokio::test]
    async fn test_get_http_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let guard = client(false, &["127.0.0.1"]);
        let result = guard.get(&format!("{}/missing", mock_server.uri())).await;
        assert!(matches!(result, Err(DomainError::HttpRequest(_))));
    }

    #[tokio::test]
    async fn test_download_file_reports_progress() {
        let mock_server = MockServer::start().await;
        let body = vec![42u8; 1000];
        Mock::given(method("GET"))
            .and(path("/model.onnx"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&mock_server)
            .await;

        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("nested").join("model.onnx");
        let last = Arc::new(AtomicU64::new(0));
        let last_clone = Arc::clone(&last);
        let report = move |p: TransferProgress| {
            assert_eq!(p.total_bytes, Some(1000));
            last_clone.store(p.bytes_read, Ordering::SeqCst);
        };

        let guard = client(false, &["127.0.0.1"]);
        let written = guard
            .download_file(
                &format!("{}/model.onnx", mock_server.uri()),
                &target,
                Some(&report),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(written, 1000);
        assert_eq!(last.load(Ordering::SeqCst), 1000);
        assert_eq!(std::fs::read(&target).unwrap(), body);
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn test_download_file_canceled_leaves_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/model.onnx"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 64]))
            .mount(&mock_server)
            .await;

        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("model.onnx");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let guard = client(false, &["127.0.0.1"]);
        let result = guard
            .download_file(
                &format!("{}/model.onnx", mock_server.uri()),
                &target,
                None,
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(DomainError::Canceled)));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn test_download_blocked_in_local_only_mode() {
        let temp = tempfile::tempdir().unwrap();
        let guard = client(true, &["127.0.0.1"]);
        let result = guard
            .download_file(
                "http://127.0.0.1:1/model.onnx",
                &temp.path().join("model.onnx"),
                None,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(DomainError::NetworkBlocked { .. })));
    }
}
