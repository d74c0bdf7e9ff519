#![forbid(unsafe_code)]

pub mod adapters;
pub mod app;
pub mod commands;
pub mod domain;
pub mod infrastructure;
pub mod ports;

pub use app::{AppController, ModelCache, ModelDownload, ModelDownloadQueue};
pub use domain::{CachedModel, DomainError, DownloadStatus, ModelDetails};
