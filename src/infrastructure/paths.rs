//! Path containment and directory helpers for the cache root.

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::domain::DomainError;

/// Resolve `.` and `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Canonical absolute form of `path`.
///
/// Symlinks are resolved for the deepest existing ancestor; components below
/// it are normalized lexically, so paths that do not exist yet still compare.
pub fn canonical_form(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().unwrap_or_default().join(path)
    };
    let lexical = lexical_normalize(&absolute);

    let mut existing = lexical.as_path();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut resolved = canonical;
            for part in tail.iter().rev() {
                resolved.push(part);
            }
            return resolved;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return lexical,
        }
    }
}

#[cfg(windows)]
fn comparable(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

#[cfg(not(windows))]
fn comparable(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// True when `candidate` lies strictly inside `base`.
///
/// Both paths are canonicalized and the base is compared with a trailing
/// separator, so `/cache/models_evil` is not inside `/cache/models`.
pub fn is_path_within_directory(base: &Path, candidate: &Path) -> bool {
    let mut base_str = comparable(&canonical_form(base));
    if !base_str.ends_with(MAIN_SEPARATOR) {
        base_str.push(MAIN_SEPARATOR);
    }
    let candidate_str = comparable(&canonical_form(candidate));

    candidate_str.starts_with(&base_str)
}

/// Delete a file or directory tree, refusing anything outside `base`.
///
/// Returns `Ok(false)` when the target does not exist.
pub fn remove_path_within(base: &Path, target: &Path) -> Result<bool, DomainError> {
    if !is_path_within_directory(base, target) {
        warn!(
            base = %base.display(),
            target = %target.display(),
            "Refusing to delete path outside the cache directory"
        );
        return Err(DomainError::invalid_argument(
            "path",
            format!("{} is outside {}", target.display(), base.display()),
        ));
    }

    if target.is_dir() {
        fs::remove_dir_all(target)?;
    } else if target.exists() {
        fs::remove_file(target)?;
    } else {
        return Ok(false);
    }

    debug!(path = %target.display(), "Removed path");
    Ok(true)
}

/// Total size in bytes of all files under `path` (or of `path` itself).
///
/// Symlinks are not followed.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Recursively copy a directory tree. Symlinks are skipped.
pub fn copy_dir_all(source: &Path, destination: &Path) -> Result<(), DomainError> {
    fs::create_dir_all(destination)?;
    for entry in WalkDir::new(source).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| DomainError::Io(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| DomainError::Io(e.to_string()))?;
        let target = destination.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            debug!(path = %entry.path().display(), "Skipping symlink while copying");
        }
    }
    Ok(())
}
