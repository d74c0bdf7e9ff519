use std::fmt;
use std::path::{Path, PathBuf};

use super::error::DomainError;

/// Host serving Hugging Face repositories.
pub const HUGGING_FACE_HOST: &str = "huggingface.co";
/// Host serving GitHub repositories.
pub const GITHUB_HOST: &str = "github.com";

const HUGGING_FACE_BASE: &str = "https://huggingface.co";
const GITHUB_BASE: &str = "https://github.com";
const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_RAW_BASE: &str = "https://raw.githubusercontent.com";
const DEFAULT_REF: &str = "main";

/// Case-insensitive ASCII prefix check.
pub(crate) fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Split an `https://host/...` URL into its host and path, or `None` for other schemes.
fn split_https(url: &str) -> Option<(&str, &str)> {
    if !starts_with_ignore_case(url, "https://") {
        return None;
    }
    let rest = &url["https://".len()..];
    match rest.find('/') {
        Some(idx) => Some((&rest[..idx], &rest[idx..])),
        None => Some((rest, "")),
    }
}

fn require(name: &'static str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::invalid_argument(name, "cannot be empty"));
    }
    Ok(())
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Remote components shared by every provider URL.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RepoLocation {
    organization: String,
    repo: String,
    reference: String,
    path: Option<String>,
    is_file: bool,
}

impl RepoLocation {
    /// Interpret `org/repo[/{kind}/{ref}/{path...}]`; `file_kinds` lists the
    /// `kind` segments that address a single file.
    fn from_segments(
        parts: &[&str],
        file_kinds: &[&str],
        original: &str,
    ) -> Result<(Self, Option<String>), DomainError> {
        if parts.len() < 2 {
            return Err(DomainError::invalid_argument(
                "url",
                format!("'{}' needs an organization and a repository", original),
            ));
        }

        let mut location = Self {
            organization: parts[0].to_string(),
            repo: parts[1].to_string(),
            reference: DEFAULT_REF.to_string(),
            path: None,
            is_file: false,
        };

        if parts.len() < 4 {
            return Ok((location, None));
        }

        let kind = parts[2].to_string();
        location.reference = parts[3].to_string();
        location.is_file = file_kinds.iter().any(|k| kind.eq_ignore_ascii_case(k));

        let path = parts[4..].join("/");
        if !path.is_empty() {
            location.path = Some(path);
        }

        Ok((location, Some(kind)))
    }

    /// `{cache_root}/{org}--{repo}/{ref}[/{directory of path}]`.
    fn local_path(&self, cache_root: &Path) -> PathBuf {
        let mut local = cache_root
            .join(format!("{}--{}", self.organization, self.repo))
            .join(&self.reference);

        if let Some(path) = &self.path {
            let parts = segments(path);
            let keep = if self.is_file {
                parts.len().saturating_sub(1)
            } else {
                parts.len()
            };
            for part in &parts[..keep] {
                local.push(part);
            }
        }

        local
    }
}

/// A parsed Hugging Face repository, directory, or file reference.
///
/// Accepts both the `org/repo` shorthand and full `https://huggingface.co/...` URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuggingFaceUrl {
    location: RepoLocation,
    partial_url: String,
}

impl HuggingFaceUrl {
    /// Parse a model name (`org/repo`) or a Hugging Face URL.
    pub fn parse(model_name_or_url: &str) -> Result<Self, DomainError> {
        let trimmed = model_name_or_url.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument(
                "model_name_or_url",
                "model name or URL cannot be empty",
            ));
        }

        let relative = if starts_with_ignore_case(trimmed, "https://") {
            match split_https(trimmed) {
                Some((host, path)) if host.eq_ignore_ascii_case(HUGGING_FACE_HOST) => path,
                _ => {
                    return Err(DomainError::invalid_argument(
                        "model_name_or_url",
                        format!("'{}' is not a Hugging Face URL", trimmed),
                    ))
                }
            }
        } else {
            trimmed
        };

        let parts = segments(relative);
        let (location, kind) = RepoLocation::from_segments(&parts, &["blob", "resolve"], trimmed)?;

        let partial_url = match kind {
            None => format!(
                "{}/{}/tree/{}",
                location.organization, location.repo, location.reference
            ),
            Some(kind) => {
                let base = format!(
                    "{}/{}/{}/{}",
                    location.organization, location.repo, kind, location.reference
                );
                match &location.path {
                    Some(path) => format!("{}/{}", base, path),
                    None => base,
                }
            }
        };

        Ok(Self {
            location,
            partial_url,
        })
    }

    pub fn organization(&self) -> &str {
        &self.location.organization
    }

    pub fn repo(&self) -> &str {
        &self.location.repo
    }

    pub fn reference(&self) -> &str {
        &self.location.reference
    }

    pub fn path(&self) -> Option<&str> {
        self.location.path.as_deref()
    }

    pub fn is_file(&self) -> bool {
        self.location.is_file
    }

    /// Canonical `https://huggingface.co/...` form of this reference.
    pub fn full_url(&self) -> String {
        format!("{}/{}", HUGGING_FACE_BASE, self.partial_url)
    }

    /// Tree API URL of the directory this reference lives in, rooted at `base`.
    ///
    /// For a file this is the file's parent directory so the listing contains
    /// the file's own metadata.
    pub fn listing_api_url_at(&self, base: &str) -> String {
        let directory = match (self.path(), self.is_file()) {
            (Some(path), true) => {
                let parts = segments(path);
                let parent = parts[..parts.len().saturating_sub(1)].join("/");
                (!parent.is_empty()).then_some(parent)
            }
            (Some(path), false) => Some(path.to_string()),
            (None, _) => None,
        };
        api_url_at(
            base,
            self.organization(),
            self.repo(),
            self.reference(),
            directory.as_deref(),
        )
    }

    /// Local cache directory for this reference.
    pub fn local_path(&self, cache_root: &Path) -> PathBuf {
        self.location.local_path(cache_root)
    }

    /// `https://huggingface.co/{org}/{repo}`.
    pub fn build_repo_url(organization: &str, repo: &str) -> Result<String, DomainError> {
        require("organization", organization)?;
        require("repo", repo)?;
        Ok(format!("{}/{}/{}", HUGGING_FACE_BASE, organization, repo))
    }

    /// `https://huggingface.co/{org}/{repo}/tree/{ref}[/{path}]`.
    pub fn build_tree_url(
        organization: &str,
        repo: &str,
        reference: &str,
        path: Option<&str>,
    ) -> Result<String, DomainError> {
        require("organization", organization)?;
        require("repo", repo)?;
        require("reference", reference)?;
        let base = format!("{}/{}/{}/tree/{}", HUGGING_FACE_BASE, organization, repo, reference);
        Ok(match path.filter(|p| !p.trim().is_empty()) {
            Some(path) => format!("{}/{}", base, path),
            None => base,
        })
    }

    /// `https://huggingface.co/{org}/{repo}/resolve/{ref}/{path}`.
    pub fn build_resolve_url(
        organization: &str,
        repo: &str,
        reference: &str,
        file_path: &str,
    ) -> Result<String, DomainError> {
        require("organization", organization)?;
        require("repo", repo)?;
        require("reference", reference)?;
        require("file_path", file_path)?;
        Ok(resolve_url_at(HUGGING_FACE_BASE, organization, repo, reference, file_path))
    }

    /// `https://huggingface.co/{org}/{repo}/blob/{ref}/{path}`.
    pub fn build_blob_url(
        organization: &str,
        repo: &str,
        reference: &str,
        file_path: &str,
    ) -> Result<String, DomainError> {
        require("organization", organization)?;
        require("repo", repo)?;
        require("reference", reference)?;
        require("file_path", file_path)?;
        Ok(format!(
            "{}/{}/{}/blob/{}/{}",
            HUGGING_FACE_BASE, organization, repo, reference, file_path
        ))
    }

    /// `https://huggingface.co/api/models/{org}/{repo}/tree/{ref}[/{path}]`.
    pub fn build_api_url(
        organization: &str,
        repo: &str,
        reference: &str,
        path: Option<&str>,
    ) -> Result<String, DomainError> {
        require("organization", organization)?;
        require("repo", repo)?;
        require("reference", reference)?;
        Ok(api_url_at(HUGGING_FACE_BASE, organization, repo, reference, path))
    }
}

pub(crate) fn api_url_at(
    base: &str,
    organization: &str,
    repo: &str,
    reference: &str,
    path: Option<&str>,
) -> String {
    let url = format!(
        "{}/api/models/{}/{}/tree/{}",
        base.trim_end_matches('/'),
        organization,
        repo,
        reference
    );
    match path.filter(|p| !p.trim().is_empty()) {
        Some(path) => format!("{}/{}", url, path.trim_matches('/')),
        None => url,
    }
}

pub(crate) fn resolve_url_at(
    base: &str,
    organization: &str,
    repo: &str,
    reference: &str,
    file_path: &str,
) -> String {
    format!(
        "{}/{}/{}/resolve/{}/{}",
        base.trim_end_matches('/'),
        organization,
        repo,
        reference,
        file_path
    )
}

/// A parsed GitHub repository, directory, or file reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubUrl {
    location: RepoLocation,
    full_url: String,
}

impl GitHubUrl {
    /// Parse a `https://github.com/{org}/{repo}[/{tree|blob}/{ref}/{path}]` URL.
    pub fn parse(url: &str) -> Result<Self, DomainError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("url", "url cannot be empty"));
        }

        let path = match split_https(trimmed) {
            Some((host, path)) if host.eq_ignore_ascii_case(GITHUB_HOST) => path,
            _ => {
                return Err(DomainError::invalid_argument(
                    "url",
                    format!("'{}' is not a GitHub URL", trimmed),
                ))
            }
        };

        let parts = segments(path);
        let (location, _) = RepoLocation::from_segments(&parts, &["blob"], trimmed)?;

        Ok(Self {
            location,
            full_url: trimmed.to_string(),
        })
    }

    pub fn organization(&self) -> &str {
        &self.location.organization
    }

    pub fn repo(&self) -> &str {
        &self.location.repo
    }

    pub fn reference(&self) -> &str {
        &self.location.reference
    }

    pub fn path(&self) -> Option<&str> {
        self.location.path.as_deref()
    }

    pub fn is_file(&self) -> bool {
        self.location.is_file
    }

    /// The URL exactly as supplied (trimmed).
    pub fn full_url(&self) -> &str {
        &self.full_url
    }

    /// Contents API URL for this reference, rooted at `api_base`.
    pub fn contents_api_url_at(&self, api_base: &str) -> String {
        contents_url_at(
            api_base,
            self.organization(),
            self.repo(),
            self.reference(),
            self.path(),
        )
    }

    /// Local cache directory for this reference.
    pub fn local_path(&self, cache_root: &Path) -> PathBuf {
        self.location.local_path(cache_root)
    }

    /// `https://github.com/{org}/{repo}`.
    pub fn build_repo_url(organization: &str, repo: &str) -> Result<String, DomainError> {
        require("organization", organization)?;
        require("repo", repo)?;
        Ok(format!("{}/{}/{}", GITHUB_BASE, organization, repo))
    }

    /// `https://github.com/{org}/{repo}/tree/{ref}[/{path}]`.
    pub fn build_tree_url(
        organization: &str,
        repo: &str,
        reference: &str,
        path: Option<&str>,
    ) -> Result<String, DomainError> {
        require("organization", organization)?;
        require("repo", repo)?;
        require("reference", reference)?;
        let base = format!("{}/{}/{}/tree/{}", GITHUB_BASE, organization, repo, reference);
        Ok(match path.filter(|p| !p.trim().is_empty()) {
            Some(path) => format!("{}/{}", base, path),
            None => base,
        })
    }

    /// `https://github.com/{org}/{repo}/blob/{ref}/{path}`.
    pub fn build_blob_url(
        organization: &str,
        repo: &str,
        reference: &str,
        file_path: &str,
    ) -> Result<String, DomainError> {
        require("organization", organization)?;
        require("repo", repo)?;
        require("reference", reference)?;
        require("file_path", file_path)?;
        Ok(format!(
            "{}/{}/{}/blob/{}/{}",
            GITHUB_BASE, organization, repo, reference, file_path
        ))
    }

    /// `https://raw.githubusercontent.com/{org}/{repo}/{ref}/{path}`.
    pub fn build_raw_url(
        organization: &str,
        repo: &str,
        reference: &str,
        file_path: &str,
    ) -> Result<String, DomainError> {
        require("organization", organization)?;
        require("repo", repo)?;
        require("reference", reference)?;
        require("file_path", file_path)?;
        Ok(raw_url_at(GITHUB_RAW_BASE, organization, repo, reference, file_path))
    }

    /// `https://api.github.com/repos/{org}/{repo}/contents[/{path}]?ref={ref}`.
    pub fn build_api_url(
        organization: &str,
        repo: &str,
        reference: &str,
        path: Option<&str>,
    ) -> Result<String, DomainError> {
        require("organization", organization)?;
        require("repo", repo)?;
        require("reference", reference)?;
        Ok(contents_url_at(GITHUB_API_BASE, organization, repo, reference, path))
    }
}

pub(crate) fn contents_url_at(
    api_base: &str,
    organization: &str,
    repo: &str,
    reference: &str,
    path: Option<&str>,
) -> String {
    let url = format!(
        "{}/repos/{}/{}/contents",
        api_base.trim_end_matches('/'),
        organization,
        repo
    );
    match path.filter(|p| !p.trim().is_empty()) {
        Some(path) => format!("{}/{}?ref={}", url, path.trim_matches('/'), reference),
        None => format!("{}?ref={}", url, reference),
    }
}

pub(crate) fn raw_url_at(
    raw_base: &str,
    organization: &str,
    repo: &str,
    reference: &str,
    file_path: &str,
) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        raw_base.trim_end_matches('/'),
        organization,
        repo,
        reference,
        file_path
    )
}

/// A remote model location on any supported provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelUrl {
    HuggingFace(HuggingFaceUrl),
    GitHub(GitHubUrl),
}

impl ModelUrl {
    /// Parse a model URL, dispatching on the GitHub host and treating everything
    /// else as Hugging Face.
    pub fn parse(url: &str) -> Result<Self, DomainError> {
        if is_github_url(url) {
            GitHubUrl::parse(url).map(ModelUrl::GitHub)
        } else {
            HuggingFaceUrl::parse(url).map(ModelUrl::HuggingFace)
        }
    }

    /// Normalize a model URL for storage and comparison.
    ///
    /// GitHub, local, and other non-Hugging Face scheme URLs are kept as-is;
    /// Hugging Face names and URLs become their canonical full URL.
    pub fn full_url_for(url: &str) -> String {
        let trimmed = url.trim();
        if is_github_url(trimmed) || is_local_url(trimmed) {
            return trimmed.to_string();
        }
        if trimmed.contains("://") && !is_hugging_face_url(trimmed) {
            return trimmed.to_string();
        }
        HuggingFaceUrl::parse(trimmed)
            .map(|hf| hf.full_url())
            .unwrap_or_else(|_| trimmed.to_string())
    }

    pub fn organization(&self) -> &str {
        match self {
            ModelUrl::HuggingFace(u) => u.organization(),
            ModelUrl::GitHub(u) => u.organization(),
        }
    }

    pub fn repo(&self) -> &str {
        match self {
            ModelUrl::HuggingFace(u) => u.repo(),
            ModelUrl::GitHub(u) => u.repo(),
        }
    }

    pub fn reference(&self) -> &str {
        match self {
            ModelUrl::HuggingFace(u) => u.reference(),
            ModelUrl::GitHub(u) => u.reference(),
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            ModelUrl::HuggingFace(u) => u.path(),
            ModelUrl::GitHub(u) => u.path(),
        }
    }

    pub fn is_file(&self) -> bool {
        match self {
            ModelUrl::HuggingFace(u) => u.is_file(),
            ModelUrl::GitHub(u) => u.is_file(),
        }
    }

    pub fn full_url(&self) -> String {
        match self {
            ModelUrl::HuggingFace(u) => u.full_url(),
            ModelUrl::GitHub(u) => u.full_url().to_string(),
        }
    }

    /// Local cache directory derived from organization, repo, ref and path.
    pub fn local_path(&self, cache_root: &Path) -> PathBuf {
        match self {
            ModelUrl::HuggingFace(u) => u.local_path(cache_root),
            ModelUrl::GitHub(u) => u.local_path(cache_root),
        }
    }

    /// `{cache_root}/{org}--{repo}/{ref}`, the directory a download owns.
    pub fn model_root(&self, cache_root: &Path) -> PathBuf {
        cache_root
            .join(format!("{}--{}", self.organization(), self.repo()))
            .join(self.reference())
    }
}

impl fmt::Display for ModelUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_url())
    }
}

pub fn is_github_url(url: &str) -> bool {
    split_https(url.trim()).is_some_and(|(host, _)| host.eq_ignore_ascii_case(GITHUB_HOST))
}

pub fn is_hugging_face_url(url: &str) -> bool {
    split_https(url.trim()).is_some_and(|(host, _)| host.eq_ignore_ascii_case(HUGGING_FACE_HOST))
}

/// User-added models are identified by a `local` URL prefix.
pub fn is_local_url(url: &str) -> bool {
    starts_with_ignore_case(url.trim(), "local")
}
