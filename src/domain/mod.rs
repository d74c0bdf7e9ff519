pub mod config;
pub mod error;
pub mod model;
pub mod url;

pub use config::AppConfig;
pub use error::DomainError;
pub use model::{
    AtomicDownloadStatus, CachedModel, CachedModelSource, DownloadState, DownloadStatus,
    HardwareAccelerator, ModelDetails, ModelFileDetails, PromptTemplate,
};
pub use url::{GitHubUrl, HuggingFaceUrl, ModelUrl};
