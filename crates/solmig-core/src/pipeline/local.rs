//! Repository client backed by a local checkout.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::config::PipelineConfig;
use crate::errors::{MigrationError, MigrationResult};
use crate::indexer::filesystem::{read_contract_sources, scan_tree, ScanOptions};
use crate::indexer::pipeline::{analyze_sources, SourceInput};
use crate::models::{AnalysisResult, RepositoryMetadata, RepositoryTree, RepositoryVisibility};
use crate::pipeline::collaborators::RepositoryClient;
use crate::pipeline::key::RepoKey;

/// Serves every key from one directory on disk.
#[derive(Clone, Debug)]
pub struct LocalRepositoryClient {
    root: PathBuf,
    scan: ScanOptions,
}

impl LocalRepositoryClient {
    pub fn new(root: impl Into<PathBuf>, scan: ScanOptions) -> Self {
        Self {
            root: root.into(),
            scan,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Key derived from the directory name, e.g. `local/my-protocol`.
    /// Characters a key segment cannot hold become `-`.
    pub fn default_key(&self) -> MigrationResult<RepoKey> {
        let name = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone())
            .file_name()
            .map(|n| key_segment(&n.to_string_lossy()))
            .ok_or_else(|| MigrationError::InvalidRepository(self.root.display().to_string()))?;
        RepoKey::new("local", name)
    }

    fn current_branch(&self) -> String {
        std::fs::read_to_string(self.root.join(".git").join("HEAD"))
            .ok()
            .and_then(|head| {
                head.trim()
                    .strip_prefix("ref: refs/heads/")
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "local".to_string())
    }

    fn resolve(&self, path: &str) -> MigrationResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(MigrationError::InvalidRepository(format!(
                "path {path:?} is outside the repository"
            )));
        }
        Ok(self.root.join(relative))
    }

    async fn scan(&self) -> MigrationResult<RepositoryTree> {
        let root = self.root.clone();
        let scan = self.scan.clone();
        tokio::task::spawn_blocking(move || scan_tree(&root, &scan)).await?
    }
}

#[async_trait::async_trait]
impl RepositoryClient for LocalRepositoryClient {
    async fn fetch_metadata(&self, key: &RepoKey) -> MigrationResult<RepositoryMetadata> {
        let tree = self.scan().await?;
        let total_bytes: u64 = tree.files().map(|f| f.size_bytes).sum();
        Ok(RepositoryMetadata {
            owner: key.owner.clone(),
            name: key.name.clone(),
            url: format!("file://{}", self.root.display()),
            default_branch: self.current_branch(),
            visibility: RepositoryVisibility::Private,
            size_kb: total_bytes.div_ceil(1024),
        })
    }

    async fn fetch_tree(&self, _key: &RepoKey) -> MigrationResult<RepositoryTree> {
        self.scan().await
    }

    async fn fetch_file_content(&self, _key: &RepoKey, path: &str) -> MigrationResult<String> {
        let absolute = self.resolve(path)?;
        Ok(tokio::fs::read_to_string(absolute).await?)
    }

    async fn prefetched_sources(
        &self,
        _key: &RepoKey,
        tree: &RepositoryTree,
    ) -> MigrationResult<Option<BTreeMap<String, String>>> {
        let root = self.root.clone();
        let tree = tree.clone();
        let sources =
            tokio::task::spawn_blocking(move || read_contract_sources(&root, &tree)).await?;
        Ok(Some(sources))
    }
}

/// Synchronous scan-and-analyze of a local checkout, keyed `local/<dir>`.
pub fn analyze_directory(root: &Path, config: &PipelineConfig) -> MigrationResult<AnalysisResult> {
    let client = LocalRepositoryClient::new(root, config.scan_options());
    let key = client.default_key()?;
    let tree = scan_tree(root, &client.scan)?;
    let mut sources = read_contract_sources(root, &tree);
    let inputs = tree
        .contract_files()
        .into_iter()
        .map(|f| match sources.remove(&f.path) {
            Some(text) => SourceInput::fetched(f.path.clone(), text),
            None => SourceInput::failed(f.path.clone(), "source could not be read"),
        })
        .collect();
    Ok(analyze_sources(
        key,
        tree.total_files(),
        inputs,
        &config.analysis_options(),
    ))
}

fn key_segment(raw: &str) -> String {
    let mut segment = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.') {
            segment.push(c);
        } else if !segment.ends_with('-') {
            segment.push('-');
        }
    }
    let trimmed = segment.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "repository".to_string()
    } else {
        trimmed.to_string()
    }
}
