use async_trait::async_trait;

use crate::domain::{ModelFileDetails, ModelUrl};

/// Enumerates the remote files that make up a model.
#[async_trait]
pub trait ModelFileSource: Send + Sync {
    /// List every downloadable file under `url`.
    ///
    /// Failures are logged and produce an empty list; callers treat "no files"
    /// as a valid outcome.
    async fn list_files(&self, url: &ModelUrl) -> Vec<ModelFileDetails>;
}
