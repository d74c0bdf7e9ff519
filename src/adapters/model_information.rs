//! Remote file enumeration for Hugging Face and GitHub hosted models.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::domain::config::NetworkConfig;
use crate::domain::url::{api_url_at, raw_url_at, resolve_url_at};
use crate::domain::{DomainError, GitHubUrl, HuggingFaceUrl, ModelFileDetails, ModelUrl};
use crate::ports::{HttpClient, ModelFileSource};

/// One entry of the GitHub contents API.
#[derive(Debug, Deserialize)]
struct GitHubEntry {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    /// Only present when a single file is requested.
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

/// One entry of the Hugging Face tree API.
#[derive(Debug, Deserialize)]
struct HuggingFaceEntry {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    lfs: Option<HuggingFaceLfs>,
}

#[derive(Debug, Deserialize)]
struct HuggingFaceLfs {
    #[serde(default)]
    oid: Option<String>,
}

impl HuggingFaceEntry {
    fn is_directory(&self) -> bool {
        self.kind.as_deref() == Some("directory")
    }

    fn sha256(&self) -> Option<String> {
        self.lfs
            .as_ref()
            .and_then(|lfs| lfs.oid.as_deref())
            .map(|oid| oid.strip_prefix("sha256:").unwrap_or(oid).to_ascii_lowercase())
            .filter(|oid| !oid.is_empty())
    }
}

/// Blob identity recovered from a Git LFS pointer file.
#[derive(Debug, PartialEq, Eq)]
struct LfsPointer {
    sha256: String,
    size: Option<u64>,
}

/// Parse the text of a Git LFS pointer.
fn parse_lfs_pointer(text: &str) -> Option<LfsPointer> {
    if !text.trim_start().starts_with("version https://git-lfs") {
        return None;
    }

    let mut sha256 = None;
    let mut size = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(oid) = line.strip_prefix("oid sha256:") {
            sha256 = Some(oid.trim().to_ascii_lowercase());
        } else if let Some(value) = line.strip_prefix("size ") {
            size = value.trim().parse().ok();
        }
    }

    sha256.map(|sha256| LfsPointer { sha256, size })
}

/// Decode base64 `content` from the contents API and read it as an LFS pointer.
fn lfs_pointer_from_content(content: &str) -> Option<LfsPointer> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = general_purpose::STANDARD.decode(compact).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    parse_lfs_pointer(&text)
}

/// Keep files whose path ends with one of `filters` (case-insensitive).
///
/// No filters means no filtering.
pub fn filter_files(files: Vec<ModelFileDetails>, filters: Option<&[String]>) -> Vec<ModelFileDetails> {
    let filters = match filters {
        Some(filters) if !filters.is_empty() => filters,
        _ => return files,
    };

    let lowered: Vec<String> = filters.iter().map(|f| f.to_lowercase()).collect();
    files
        .into_iter()
        .filter(|file| {
            file.path.as_deref().is_some_and(|path| {
                let path = path.to_lowercase();
                lowered.iter().any(|filter| path.ends_with(filter.as_str()))
            })
        })
        .collect()
}

/// Queries provider APIs to list the files that make up a model.
pub struct RemoteModelFiles {
    http: Arc<dyn HttpClient>,
    huggingface_base: String,
    github_api_base: String,
    github_raw_base: String,
    max_directory_fetches: usize,
}

impl RemoteModelFiles {
    pub fn new(http: Arc<dyn HttpClient>, network: &NetworkConfig, max_directory_fetches: usize) -> Self {
        Self {
            http,
            huggingface_base: network.huggingface_base.trim_end_matches('/').to_string(),
            github_api_base: network.github_api_base.trim_end_matches('/').to_string(),
            github_raw_base: network.github_raw_base.trim_end_matches('/').to_string(),
            max_directory_fetches: max_directory_fetches.max(1),
        }
    }

    /// Files addressed by a GitHub URL, with LFS pointers resolved to the
    /// real blob hash and size.
    pub async fn get_download_files_from_github(&self, url: &GitHubUrl) -> Vec<ModelFileDetails> {
        let api_url = url.contents_api_url_at(&self.github_api_base);

        let body = match self.http.get(&api_url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %api_url, error = %e, "Failed to get model details from GitHub");
                return Vec::new();
            }
        };

        // A single file comes back as an object rather than an array
        let trimmed = body.trim();
        let parsed: Result<Vec<GitHubEntry>, DomainError> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed).map_err(DomainError::from)
        } else {
            serde_json::from_str::<GitHubEntry>(trimmed)
                .map(|entry| vec![entry])
                .map_err(DomainError::from)
        };

        let entries = match parsed {
            Ok(entries) => entries,
            Err(e) => {
                warn!(url = %api_url, error = %e, "Failed to parse GitHub contents response");
                return Vec::new();
            }
        };

        let files: Vec<ModelFileDetails> = entries
            .into_iter()
            .filter(|entry| entry.kind.as_deref() != Some("dir"))
            .filter_map(|entry| {
                let path = entry.path.filter(|p| !p.is_empty())?;

                let pointer = match (entry.content.as_deref(), entry.encoding.as_deref()) {
                    (Some(content), Some("base64") | None) => lfs_pointer_from_content(content),
                    _ => None,
                };

                let download_url = entry.download_url.or_else(|| {
                    Some(raw_url_at(
                        &self.github_raw_base,
                        url.organization(),
                        url.repo(),
                        url.reference(),
                        &path,
                    ))
                });

                let (size, sha256) = match pointer {
                    Some(pointer) => (pointer.size.unwrap_or(entry.size), Some(pointer.sha256)),
                    None => (entry.size, None),
                };

                Some(ModelFileDetails {
                    download_url,
                    size,
                    name: ModelFileDetails::file_name_from_path(&path),
                    path: Some(path),
                    sha256,
                })
            })
            .collect();

        debug!(url = %url.full_url(), count = files.len(), "Listed GitHub files");
        files
    }

    /// Files addressed by a Hugging Face URL, expanding subdirectories with
    /// bounded parallelism. File order is not stable.
    pub async fn get_download_files_from_hugging_face(&self, url: &HuggingFaceUrl) -> Vec<ModelFileDetails> {
        let listing_url = url.listing_api_url_at(&self.huggingface_base);

        let mut entries = match fetch_hugging_face_listing(self.http.as_ref(), &listing_url).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(url = %listing_url, error = %e, "Failed to get model details from Hugging Face");
                return Vec::new();
            }
        };

        if url.is_file() {
            let target = url.path().unwrap_or_default();
            entries.retain(|entry| entry.path.as_deref() == Some(target));
        }

        let (mut pending, mut files): (Vec<HuggingFaceEntry>, Vec<HuggingFaceEntry>) =
            entries.into_iter().partition(HuggingFaceEntry::is_directory);

        let semaphore = Arc::new(Semaphore::new(self.max_directory_fetches));
        let mut tasks = JoinSet::new();

        loop {
            while let Some(directory) = pending.pop() {
                let Some(path) = directory.path.filter(|p| !p.is_empty()) else {
                    continue;
                };
                let directory_url = api_url_at(
                    &self.huggingface_base,
                    url.organization(),
                    url.repo(),
                    url.reference(),
                    Some(&path),
                );
                let http = Arc::clone(&self.http);
                let semaphore = Arc::clone(&semaphore);

                tasks.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return Vec::new(),
                    };
                    match fetch_hugging_face_listing(http.as_ref(), &directory_url).await {
                        Ok(entries) => entries,
                        Err(e) => {
                            warn!(url = %directory_url, error = %e, "Failed to list Hugging Face directory");
                            Vec::new()
                        }
                    }
                });
            }

            match tasks.join_next().await {
                None => break,
                Some(Ok(found)) => {
                    for entry in found {
                        if entry.is_directory() {
                            pending.push(entry);
                        } else {
                            files.push(entry);
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Directory listing task failed");
                }
            }
        }

        let result: Vec<ModelFileDetails> = files
            .into_iter()
            .filter_map(|entry| {
                let sha256 = entry.sha256();
                let path = entry.path.filter(|p| !p.is_empty())?;
                Some(ModelFileDetails {
                    download_url: Some(resolve_url_at(
                        &self.huggingface_base,
                        url.organization(),
                        url.repo(),
                        url.reference(),
                        &path,
                    )),
                    size: entry.size,
                    name: ModelFileDetails::file_name_from_path(&path),
                    path: Some(path),
                    sha256,
                })
            })
            .collect();

        debug!(url = %url.full_url(), count = result.len(), "Listed Hugging Face files");
        result
    }
}

async fn fetch_hugging_face_listing(
    http: &dyn HttpClient,
    url: &str,
) -> Result<Vec<HuggingFaceEntry>, DomainError> {
    let body = http.get(url).await?;
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl ModelFileSource for RemoteModelFiles {
    async fn list_files(&self, url: &ModelUrl) -> Vec<ModelFileDetails> {
        info!(url = %url, "Enumerating remote model files");
        match url {
            ModelUrl::HuggingFace(hf) => self.get_download_files_from_hugging_face(hf).await,
            ModelUrl::GitHub(gh) => self.get_download_files_from_github(gh).await,
        }
    }
}
