use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{DomainError, ModelDetails};

/// A model backend that manages its own artifacts outside the cache
/// (a local runtime with its own model store, for instance).
#[async_trait]
pub trait ExternalModelProvider: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// URL scheme prefix identifying models served by this provider.
    fn url_prefix(&self) -> &str;

    /// Whether `url` belongs to this provider.
    fn handles(&self, url: &str) -> bool {
        let prefix = self.url_prefix();
        url.len() >= prefix.len()
            && url.is_char_boundary(prefix.len())
            && url[..prefix.len()].eq_ignore_ascii_case(prefix)
    }

    /// Whether the backend is installed and responding.
    ///
    /// Once observed true the answer is cached for the provider's lifetime.
    async fn is_ready(&self) -> bool;

    /// Models the backend currently has available.
    async fn list_models(&self) -> Result<Vec<ModelDetails>, DomainError>;

    /// Ask the backend to fetch `details`.
    ///
    /// `Ok(Some(message))` means the model is usable but the backend reported
    /// something worth surfacing to the user.
    async fn download(
        &self,
        details: &ModelDetails,
        progress: Option<&(dyn Fn(f32) + Send + Sync)>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, DomainError>;
}
