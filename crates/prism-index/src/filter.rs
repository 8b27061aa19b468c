//! Indexable-file detection and language tagging.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Extensions accepted for indexing: code, web, config, and docs.
const INDEXABLE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "java", "cpp", "c", "h", "cs", "php", "rb", "go", "rs",
    "swift", "kt", "scala", "html", "css", "scss", "sass", "less", "md", "txt", "rst", "json",
    "yaml", "yml", "toml", "sql", "sh", "bat", "ps1", "proto", "tex", "lua", "pl", "hs", "ex",
    "exs", "vb", "sol", "cob", "cbl", "dockerfile",
];

/// Well-known file names accepted regardless of extension.
const INDEXABLE_NAMES: &[&str] = &[
    "README",
    "LICENSE",
    "CHANGELOG",
    "CONTRIBUTING",
    "INSTALL",
    "Dockerfile",
    "Makefile",
    "requirements.txt",
    "package.json",
    "setup.py",
    "pyproject.toml",
    "Cargo.toml",
    "pom.xml",
    "build.gradle",
    "composer.json",
    "Gemfile",
    ".gitignore",
    ".env.example",
];

/// Directory names never descended into.
pub(crate) const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "__pycache__",
    ".pytest_cache",
    "venv",
    "env",
    ".env",
    "build",
    "dist",
    "target",
    ".idea",
    ".vscode",
    "logs",
    "tmp",
    "temp",
];

/// Allow-list filter applied by the indexer before chunking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileFilter {
    /// Files larger than this are skipped (default: 100 KiB).
    pub max_file_bytes: u64,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            max_file_bytes: 100 * 1024,
        }
    }
}

/// Why a file was left out of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAllowed,
    TooLarge,
}

impl FileFilter {
    /// # Errors
    ///
    /// Returns the reason the file must be skipped.
    pub fn check(&self, path: &str, size_bytes: u64) -> Result<(), SkipReason> {
        if !is_indexable(Path::new(path)) {
            return Err(SkipReason::NotAllowed);
        }
        if size_bytes > self.max_file_bytes {
            return Err(SkipReason::TooLarge);
        }
        Ok(())
    }
}

/// Whether the file name or extension is on the allow-list.
#[must_use]
pub fn is_indexable(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if INDEXABLE_NAMES.contains(&name) {
        return true;
    }
    let stem = name.split('.').next().unwrap_or(name);
    if INDEXABLE_NAMES.contains(&stem) && !stem.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| INDEXABLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Language tag stored in the record payload; `None` for prose and data files.
#[must_use]
pub fn detect_language(path: &Path) -> Option<&'static str> {
    if path.file_name().and_then(|n| n.to_str()) == Some("Dockerfile") {
        return Some("dockerfile");
    }
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let lang = match ext.as_str() {
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "rb" => "ruby",
        "go" => "go",
        "rs" => "rust",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        "html" => "html",
        "css" | "scss" | "sass" | "less" => "css",
        "sql" => "sql",
        "sh" => "bash",
        "bat" | "ps1" => "shell",
        "proto" => "protobuf",
        "lua" => "lua",
        "pl" => "perl",
        "hs" => "haskell",
        "ex" | "exs" => "elixir",
        "vb" => "visualbasic",
        "sol" => "solidity",
        "cob" | "cbl" => "cobol",
        "dockerfile" => "dockerfile",
        "toml" => "toml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "md" => "markdown",
        _ => return None,
    };
    Some(lang)
}
