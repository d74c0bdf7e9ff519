use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::DomainError;
use crate::infrastructure::TransferProgress;

/// Callback invoked after every chunk of a file transfer.
pub type ProgressCallback<'a> = &'a (dyn Fn(TransferProgress) + Send + Sync);

/// HTTP client port for all network requests.
/// All network traffic must go through this interface.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform a GET request and return the body as text.
    async fn get(&self, url: &str) -> Result<String, DomainError>;

    /// Stream `url` into `path`, returning the number of bytes written.
    ///
    /// The body is written next to `path` and renamed into place once
    /// complete, so a failed or canceled transfer never leaves a partial file
    /// at `path`. Cancellation yields [`DomainError::Canceled`].
    async fn download_file(
        &self,
        url: &str,
        path: &Path,
        progress: Option<ProgressCallback<'_>>,
        cancel: &CancellationToken,
    ) -> Result<u64, DomainError>;

    /// Check if network requests are currently blocked.
    fn is_network_blocked(&self) -> bool;

    /// Get the list of allowed domains (when not in local-only mode).
    fn allowed_domains(&self) -> Vec<String>;
}
