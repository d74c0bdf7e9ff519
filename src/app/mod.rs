pub mod controller;
pub mod download;
pub mod download_queue;
pub mod model_cache;

pub use controller::{AppController, AppPaths};
pub use download::{DownloadEvent, ModelDownload};
pub use download_queue::{CompletionHook, ModelDownloadQueue, QueueEvent};
pub use model_cache::ModelCache;
