use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::url::{is_github_url, is_local_url, ModelUrl};

/// Hardware a model can execute on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HardwareAccelerator {
    Cpu,
    Gpu,
    Dml,
    Npu,
    Qnn,
    Wcrapi,
    Ollama,
    OpenAi,
    FoundryLocal,
}

impl HardwareAccelerator {
    /// Parse an accelerator tag such as `"cpu"` or `"DML"`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "CPU" => Some(HardwareAccelerator::Cpu),
            "GPU" => Some(HardwareAccelerator::Gpu),
            "DML" => Some(HardwareAccelerator::Dml),
            "NPU" => Some(HardwareAccelerator::Npu),
            "QNN" => Some(HardwareAccelerator::Qnn),
            "WCRAPI" => Some(HardwareAccelerator::Wcrapi),
            "OLLAMA" => Some(HardwareAccelerator::Ollama),
            "OPENAI" => Some(HardwareAccelerator::OpenAi),
            "FOUNDRYLOCAL" => Some(HardwareAccelerator::FoundryLocal),
            _ => None,
        }
    }
}

impl std::fmt::Display for HardwareAccelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            HardwareAccelerator::Cpu => "CPU",
            HardwareAccelerator::Gpu => "GPU",
            HardwareAccelerator::Dml => "DML",
            HardwareAccelerator::Npu => "NPU",
            HardwareAccelerator::Qnn => "QNN",
            HardwareAccelerator::Wcrapi => "WCRAPI",
            HardwareAccelerator::Ollama => "OLLAMA",
            HardwareAccelerator::OpenAi => "OPENAI",
            HardwareAccelerator::FoundryLocal => "FOUNDRYLOCAL",
        };
        write!(f, "{}", tag)
    }
}

/// Accepts either a single accelerator or a list of them.
fn single_or_list<'de, D>(deserializer: D) -> Result<Vec<HardwareAccelerator>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(HardwareAccelerator),
        Many(Vec<HardwareAccelerator>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(one) => vec![one],
        OneOrMany::Many(many) => many,
    })
}

/// Chat prompt template attached to language models.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PromptTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// Identity and descriptive record for a model.
///
/// `url` is the canonical source identifier and the cache key. A `size` of 0
/// means no download is required (API-backed models).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModelDetails {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(
        rename = "HardwareAccelerator",
        default,
        deserialize_with = "single_or_list"
    )]
    pub hardware_accelerators: Vec<HardwareAccelerator>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default)]
    pub is_user_added: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<PromptTemplate>,
    /// Path suffixes restricting which remote files are downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_filters: Option<Vec<String>>,
}

impl ModelDetails {
    /// Details for a model hosted at `url`.
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Normalized form of `url`, used as the cache and queue key.
    pub fn full_url(&self) -> String {
        ModelUrl::full_url_for(&self.url)
    }
}

/// File extensions whose contents are integrity-checked after download.
const VERIFIED_EXTENSIONS: [&str; 3] = [".onnx", ".gguf", ".safetensors"];

/// One remote file belonging to a model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFileDetails {
    pub download_url: Option<String>,
    pub size: u64,
    pub name: Option<String>,
    /// Repository-relative path using `/` separators.
    pub path: Option<String>,
    /// Expected SHA-256 of the file contents, lowercase hex.
    pub sha256: Option<String>,
}

impl ModelFileDetails {
    /// Main model weights are verified; auxiliary files are not.
    pub fn should_verify_integrity(&self) -> bool {
        self.path.as_deref().is_some_and(|path| {
            let lower = path.to_ascii_lowercase();
            VERIFIED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
        })
    }

    pub fn has_verification_hash(&self) -> bool {
        self.sha256.as_deref().is_some_and(|h| !h.trim().is_empty())
    }

    /// Last path segment of `path`.
    pub fn file_name_from_path(path: &str) -> Option<String> {
        path.split('/').filter(|s| !s.is_empty()).last().map(str::to_string)
    }
}

/// Where a cached model came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachedModelSource {
    GitHub,
    HuggingFace,
    Local,
}

impl CachedModelSource {
    pub fn from_url(url: &str) -> Self {
        if is_github_url(url) {
            CachedModelSource::GitHub
        } else if is_local_url(url) {
            CachedModelSource::Local
        } else {
            CachedModelSource::HuggingFace
        }
    }
}

/// A completed download (or user-added model) persisted in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CachedModel {
    pub details: ModelDetails,
    /// Normalized URL; the store key.
    pub url: String,
    pub path: PathBuf,
    pub is_file: bool,
    pub size: u64,
    pub source: CachedModelSource,
    pub date_time_cached: DateTime<Utc>,
}

impl CachedModel {
    pub fn new(details: ModelDetails, path: impl Into<PathBuf>, is_file: bool, size: u64) -> Self {
        let url = details.full_url();
        let source = CachedModelSource::from_url(&url);
        Self {
            details,
            url,
            path: path.into(),
            is_file,
            size,
            source,
            date_time_cached: Utc::now(),
        }
    }

    /// True when the backing file or directory is present on disk.
    pub fn path_exists(&self) -> bool {
        Path::new(&self.path).exists()
    }
}

/// Download task state machine.
///
/// State transitions:
/// - Waiting -> InProgress (transfer begins)
/// - InProgress -> Completed (files fetched, possibly with an integrity warning)
/// - Waiting | InProgress -> Canceled (cancel_download)
/// - InProgress -> Failed (unrecoverable transfer error)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DownloadStatus {
    Waiting = 0,
    InProgress = 1,
    Completed = 2,
    Canceled = 3,
    Failed = 4,
}

impl DownloadStatus {
    /// Check if `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(&self, next: DownloadStatus) -> bool {
        match (self, next) {
            (DownloadStatus::Waiting, DownloadStatus::InProgress) => true,
            (DownloadStatus::Waiting, DownloadStatus::Canceled) => true,
            (DownloadStatus::InProgress, DownloadStatus::Completed) => true,
            (DownloadStatus::InProgress, DownloadStatus::Canceled) => true,
            (DownloadStatus::InProgress, DownloadStatus::Failed) => true,
            _ => false,
        }
    }
}

impl From<u8> for DownloadStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => DownloadStatus::Waiting,
            1 => DownloadStatus::InProgress,
            2 => DownloadStatus::Completed,
            3 => DownloadStatus::Canceled,
            _ => DownloadStatus::Failed,
        }
    }
}

impl From<DownloadStatus> for u8 {
    fn from(status: DownloadStatus) -> Self {
        status as u8
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DownloadStatus::Waiting => "waiting",
            DownloadStatus::InProgress => "in progress",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Canceled => "canceled",
            DownloadStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Atomic wrapper for DownloadStatus for lock-free reads.
#[derive(Debug)]
pub struct AtomicDownloadStatus(AtomicU8);

impl AtomicDownloadStatus {
    pub fn new(status: DownloadStatus) -> Self {
        Self(AtomicU8::new(status.into()))
    }

    pub fn load(&self) -> DownloadStatus {
        self.0.load(Ordering::Acquire).into()
    }

    /// Move to `new` from whatever non-terminal state is current.
    ///
    /// Returns the previous state on success, `None` if the transition is illegal.
    pub fn advance(&self, new: DownloadStatus) -> Option<DownloadStatus> {
        let mut current = self.load();
        loop {
            if !current.can_transition_to(new) {
                return None;
            }
            match self.0.compare_exchange(
                current.into(),
                new.into(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(current),
                Err(actual) => current = actual.into(),
            }
        }
    }
}

impl Default for AtomicDownloadStatus {
    fn default() -> Self {
        Self::new(DownloadStatus::Waiting)
    }
}

/// Payload of a download's state-changed notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadState {
    pub url: String,
    /// Fraction complete, 0.0 - 1.0.
    pub progress: f32,
    pub status: DownloadStatus,
    pub warning_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_status_transitions() {
        assert!(DownloadStatus::Waiting.can_transition_to(DownloadStatus::InProgress));
        assert!(DownloadStatus::Waiting.can_transition_to(DownloadStatus::Canceled));
        assert!(DownloadStatus::InProgress.can_transition_to(DownloadStatus::Failed));
        assert!(!DownloadStatus::Completed.can_transition_to(DownloadStatus::Canceled));
        assert!(!DownloadStatus::Canceled.can_transition_to(DownloadStatus::InProgress));
        assert!(!DownloadStatus::Waiting.can_transition_to(DownloadStatus::Completed));
    }

    #[test]
    fn test_atomic_status_advance() {
        let status = AtomicDownloadStatus::default();
        assert_eq!(status.advance(DownloadStatus::InProgress), Some(DownloadStatus::Waiting));
        assert_eq!(status.advance(DownloadStatus::Completed), Some(DownloadStatus::InProgress));
        assert_eq!(status.advance(DownloadStatus::Canceled), None);
        assert_eq!(status.load(), DownloadStatus::Completed);
    }

    #[test]
    fn test_should_verify_integrity() {
        let mut file = ModelFileDetails {
            path: Some("onnx/model.ONNX".to_string()),
            ..Default::default()
        };
        assert!(file.should_verify_integrity());
        assert!(!file.has_verification_hash());

        file.sha256 = Some("abc".to_string());
        assert!(file.has_verification_hash());

        file.path = Some("tokenizer.json".to_string());
        assert!(!file.should_verify_integrity());
    }

    #[test]
    fn test_model_details_accepts_single_accelerator() {
        let json = r#"{"Id":"phi","Name":"Phi","Url":"microsoft/phi-2","HardwareAccelerator":"CPU","Size":10}"#;
        let details: ModelDetails = serde_json::from_str(json).unwrap();
        assert_eq!(details.hardware_accelerators, vec![HardwareAccelerator::Cpu]);

        let json = r#"{"Id":"phi","Name":"Phi","Url":"microsoft/phi-2","HardwareAccelerator":["CPU","DML"]}"#;
        let details: ModelDetails = serde_json::from_str(json).unwrap();
        assert_eq!(details.hardware_accelerators.len(), 2);
        assert_eq!(details.size, 0);
    }

    #[test]
    fn test_cached_model_source_and_url() {
        let hf = CachedModel::new(ModelDetails::new("a", "A", "microsoft/phi-2"), "/tmp/a", false, 1);
        assert_eq!(hf.source, CachedModelSource::HuggingFace);
        assert_eq!(hf.url, "https://huggingface.co/microsoft/phi-2/tree/main");

        let gh = CachedModel::new(
            ModelDetails::new("b", "B", "https://github.com/microsoft/onnxruntime"),
            "/tmp/b",
            false,
            1,
        );
        assert_eq!(gh.source, CachedModelSource::GitHub);

        let local = CachedModel::new(ModelDetails::new("c", "C", "local-model:/tmp/c"), "/tmp/c", false, 1);
        assert_eq!(local.source, CachedModelSource::Local);
    }

    #[test]
    fn test_hardware_accelerator_tags() {
        assert_eq!(HardwareAccelerator::from_tag("dml"), Some(HardwareAccelerator::Dml));
        assert_eq!(HardwareAccelerator::from_tag("bogus"), None);
        assert_eq!(HardwareAccelerator::FoundryLocal.to_string(), "FOUNDRYLOCAL");
    }
}
