//! Local repository scanning for ingestion.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::errors::{MigrationError, MigrationResult};
use crate::models::RepositoryTree;

const DEFAULT_SENSITIVE_EXCLUDE_PATTERNS: &[&str] = &[
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*secret*",
    "*secrets*",
    "*credential*",
    "*mnemonic*",
    "id_rsa",
    "id_dsa",
];

/// Build output and dependency directories that never hold analysable
/// sources of the repository itself.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "cache",
    "out",
    "artifacts",
    "broadcast",
    "typechain-types",
];

#[derive(Clone, Debug)]
pub struct ScanOptions {
    pub exclude_dirs: Vec<String>,
    pub exclude_sensitive: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect(),
            exclude_sensitive: true,
        }
    }
}

/// A file found by the scanner: repository-relative path and size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: String,
    pub size_bytes: u64,
}

fn glob_match(text: &str, pattern: &str) -> bool {
    // `*` and `?` only; enough for the sensitive-file patterns.
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let mut dp = vec![vec![false; p.len() + 1]; t.len() + 1];
    dp[0][0] = true;
    for j in 1..=p.len() {
        if p[j - 1] == '*' {
            dp[0][j] = dp[0][j - 1];
        }
    }
    for i in 1..=t.len() {
        for j in 1..=p.len() {
            if p[j - 1] == '*' {
                dp[i][j] = dp[i][j - 1] || dp[i - 1][j];
            } else if p[j - 1] == '?' || t[i - 1] == p[j - 1] {
                dp[i][j] = dp[i - 1][j - 1];
            }
        }
    }
    dp[t.len()][p.len()]
}

fn is_sensitive(file_name: &str) -> bool {
    let lowered = file_name.to_lowercase();
    DEFAULT_SENSITIVE_EXCLUDE_PATTERNS
        .iter()
        .any(|pattern| glob_match(&lowered, pattern))
}

fn in_excluded_dir(relative: &Path, exclude_dirs: &[String]) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            exclude_dirs.iter().any(|d| d == name.as_ref())
        }
        _ => false,
    })
}

fn relative_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Walk `repo_root` honouring `.gitignore`, excluded directories and the
/// sensitive-file patterns. Results are sorted by path.
pub fn iter_repo_files(repo_root: &Path, options: &ScanOptions) -> MigrationResult<Vec<ScannedFile>> {
    if !repo_root.is_dir() {
        return Err(MigrationError::InvalidRepository(format!(
            "{} is not a directory",
            repo_root.display()
        )));
    }

    let root = repo_root.to_path_buf();
    let exclude_dirs = options.exclude_dirs.clone();
    let mut builder = WalkBuilder::new(repo_root);
    builder
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .require_git(false);
    builder.filter_entry(move |entry| {
        let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
        !in_excluded_dir(relative, &exclude_dirs)
    });

    let mut files = Vec::new();
    for result in builder.build() {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "failed to read directory entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy();
        if options.exclude_sensitive && is_sensitive(&file_name) {
            debug!(path = %path.display(), "skipping sensitive file");
            continue;
        }
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(ScannedFile {
            path: relative_path(path, repo_root),
            size_bytes,
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Scan a local checkout into a categorised tree.
pub fn scan_tree(repo_root: &Path, options: &ScanOptions) -> MigrationResult<RepositoryTree> {
    let files = iter_repo_files(repo_root, options)?;
    Ok(RepositoryTree::from_paths(
        files.into_iter().map(|f| (f.path, f.size_bytes)),
    ))
}

/// Read the text of every contract file in `tree`. Unreadable or non-UTF-8
/// files are left out and picked up as fetch failures by the analysis stage.
pub fn read_contract_sources(repo_root: &Path, tree: &RepositoryTree) -> BTreeMap<String, String> {
    let mut sources = BTreeMap::new();
    for file in tree.contract_files() {
        match std::fs::read_to_string(repo_root.join(&file.path)) {
            Ok(text) => {
                sources.insert(file.path.clone(), text);
            }
            Err(err) => warn!(path = %file.path, error = %err, "failed to read contract source"),
        }
    }
    sources
}

pub fn compute_content_hash(path: &Path) -> MigrationResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}
