//! Local repository loader: walks a checkout and collects file contents.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::filter::SKIP_DIRS;

/// One file handed to the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub content: String,
    /// On-disk size; may exceed `content.len()` when the body was not loaded.
    pub size_bytes: u64,
}

impl SourceFile {
    #[must_use]
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            size_bytes: content.len() as u64,
            content,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepositorySnapshot {
    pub identity: String,
    pub default_branch: Option<String>,
    pub files: Vec<SourceFile>,
}

/// Walk `root` (gitignore-aware) and load every UTF-8 file.
///
/// Files larger than `max_file_bytes` and files that are not valid UTF-8 are
/// listed with an empty body so the indexer can count them as skipped. When `identity` is `None` it is taken
/// from the `origin` remote in `.git/config`, falling back to the directory name.
///
/// # Errors
///
/// Returns `IndexError::InvalidInput` if `root` is not a directory, or an IO
/// error if the walk fails.
pub fn load_repository(
    root: &Path,
    identity: Option<&str>,
    max_file_bytes: u64,
) -> Result<RepositorySnapshot> {
    if !root.is_dir() {
        return Err(IndexError::InvalidInput(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .require_git(false)
        .filter_entry(|e| {
            !(e.file_type().is_some_and(|ft| ft.is_dir())
                && e.file_name()
                    .to_str()
                    .is_some_and(|n| SKIP_DIRS.contains(&n)))
        })
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| IndexError::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let abs = entry.path();
        let rel = abs
            .strip_prefix(root)
            .unwrap_or(abs)
            .to_string_lossy()
            .replace('\\', "/");
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or_default();

        if size_bytes > max_file_bytes {
            files.push(SourceFile {
                path: rel,
                content: String::new(),
                size_bytes,
            });
            continue;
        }
        match std::fs::read_to_string(abs) {
            Ok(content) => files.push(SourceFile {
                path: rel,
                content,
                size_bytes,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::debug!(path = %rel, "non-UTF-8 file listed without content");
                files.push(SourceFile {
                    path: rel,
                    content: String::new(),
                    size_bytes,
                });
            }
            Err(e) => return Err(e.into()),
        }
    }

    let identity = identity
        .map(str::to_owned)
        .or_else(|| origin_identity(root))
        .or_else(|| {
            root.canonicalize()
                .ok()?
                .file_name()?
                .to_str()
                .map(str::to_owned)
        })
        .ok_or_else(|| IndexError::InvalidInput("cannot derive repository identity".into()))?;

    let default_branch = head_branch(root);
    tracing::info!(
        repository = %identity,
        files = files.len(),
        branch = default_branch.as_deref().unwrap_or("-"),
        "loaded repository"
    );

    Ok(RepositorySnapshot {
        identity,
        default_branch,
        files,
    })
}

fn head_branch(root: &Path) -> Option<String> {
    let head = std::fs::read_to_string(root.join(".git").join("HEAD")).ok()?;
    head.trim()
        .strip_prefix("ref: refs/heads/")
        .map(str::to_owned)
}

fn origin_identity(root: &Path) -> Option<String> {
    let config = std::fs::read_to_string(root.join(".git").join("config")).ok()?;
    let mut in_origin = false;
    for line in config.lines().map(str::trim) {
        if line.starts_with('[') {
            in_origin = line == r#"[remote "origin"]"#;
            continue;
        }
        if in_origin
            && let Some(url) = line.strip_prefix("url").map(str::trim_start)
            && let Some(url) = url.strip_prefix('=')
        {
            return identity_from_url(url.trim());
        }
    }
    None
}

/// `https://host/owner/repo(.git)` or `git@host:owner/repo(.git)` to `owner/repo`;
/// Azure-style `org/project/_git/repo` to `org/project/repo`.
fn identity_from_url(url: &str) -> Option<String> {
    let path = if let Some((_, rest)) = url.split_once("://") {
        rest.split_once('/')?.1
    } else {
        url.split_once(':')?.1
    };
    let path = path.trim_end_matches('/').trim_end_matches(".git");
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.contains(&"_git") {
        let kept: Vec<&str> = parts.into_iter().filter(|p| *p != "_git").collect();
        return (!kept.is_empty()).then(|| kept.join("/"));
    }
    match parts.as_slice() {
        [] => None,
        [single] => Some((*single).to_owned()),
        [.., owner, repo] => Some(format!("{owner}/{repo}")),
    }
}
