//! Pipeline configuration: TOML file, environment overrides, clamping.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{MigrationError, MigrationResult};
use crate::guards::{
    clamp_int, clamp_ttl_secs, clamp_workers, MAX_ANALYSIS_WORKERS, MAX_FETCH_CONCURRENCY,
    MAX_REPOSITORIES, MAX_SOURCE_BYTES, MAX_TRANSFORM_CONCURRENCY, MIN_SOURCE_BYTES,
};
use crate::indexer::filesystem::{ScanOptions, DEFAULT_EXCLUDE_DIRS};
use crate::indexer::imports::DEFAULT_EXTERNAL_IMPORT_PREFIXES;
use crate::indexer::pipeline::AnalysisOptions;

/// Parent names that resolve to well-known external bases.
pub const DEFAULT_EXTERNAL_PARENT_NAMES: &[&str] = &[
    "ERC*",
    "Ownable*",
    "AccessControl*",
    "Initializable",
    "*Upgradeable",
    "ReentrancyGuard*",
    "Pausable*",
    "Context",
    "UUPSUpgradeable",
    "Proxy",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cache_ttl_secs: u64,
    pub max_repositories: usize,
    pub analysis_workers: usize,
    pub fetch_concurrency: usize,
    pub transform_concurrency: usize,
    pub max_source_bytes: usize,
    pub exclude_sensitive: bool,
    pub exclude_dirs: Vec<String>,
    pub external_import_prefixes: Vec<String>,
    /// Exact names or `*`-prefix/suffix patterns, e.g. `ERC*`, `*Upgradeable`.
    pub external_parent_names: Vec<String>,
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 1800,
            max_repositories: 64,
            analysis_workers: 4,
            fetch_concurrency: 8,
            transform_concurrency: 4,
            max_source_bytes: 1024 * 1024,
            exclude_sensitive: true,
            exclude_dirs: to_strings(DEFAULT_EXCLUDE_DIRS),
            external_import_prefixes: to_strings(DEFAULT_EXTERNAL_IMPORT_PREFIXES),
            external_parent_names: to_strings(DEFAULT_EXTERNAL_PARENT_NAMES),
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    let v = raw.trim().to_lowercase();
    !matches!(v.as_str(), "0" | "false" | "no" | "off")
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> MigrationResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| MigrationError::Config(format!("{name} must be a non-negative integer, got {raw:?}")))
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> MigrationResult<Self> {
        let config: PipelineConfig =
            toml::from_str(text).map_err(|e| MigrationError::Config(e.to_string()))?;
        Ok(config.clamped())
    }

    pub fn from_file(path: &Path) -> MigrationResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MigrationError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Defaults, then `path` if given, then `SOLMIG_*` environment variables.
    pub fn load(path: Option<&Path>) -> MigrationResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> MigrationResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("SOLMIG_CACHE_TTL_SECS") {
            self.cache_ttl_secs = parse_number("SOLMIG_CACHE_TTL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("SOLMIG_MAX_REPOSITORIES") {
            self.max_repositories = parse_number("SOLMIG_MAX_REPOSITORIES", &raw)?;
        }
        if let Some(raw) = lookup("SOLMIG_ANALYSIS_WORKERS") {
            self.analysis_workers = parse_number("SOLMIG_ANALYSIS_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("SOLMIG_FETCH_CONCURRENCY") {
            self.fetch_concurrency = parse_number("SOLMIG_FETCH_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = lookup("SOLMIG_TRANSFORM_CONCURRENCY") {
            self.transform_concurrency = parse_number("SOLMIG_TRANSFORM_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = lookup("SOLMIG_EXCLUDE_SENSITIVE") {
            self.exclude_sensitive = parse_flag(&raw);
        }
        Ok(self.clamped())
    }

    pub fn clamped(mut self) -> Self {
        self.cache_ttl_secs = clamp_ttl_secs(self.cache_ttl_secs);
        self.max_repositories = clamp_int(self.max_repositories, 1, MAX_REPOSITORIES);
        self.analysis_workers = clamp_workers(self.analysis_workers, MAX_ANALYSIS_WORKERS);
        self.fetch_concurrency = clamp_workers(self.fetch_concurrency, MAX_FETCH_CONCURRENCY);
        self.transform_concurrency =
            clamp_workers(self.transform_concurrency, MAX_TRANSFORM_CONCURRENCY);
        self.max_source_bytes = clamp_int(self.max_source_bytes, MIN_SOURCE_BYTES, MAX_SOURCE_BYTES);
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn analysis_options(&self) -> AnalysisOptions {
        AnalysisOptions {
            workers: self.analysis_workers,
            max_source_bytes: self.max_source_bytes,
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            exclude_dirs: self.exclude_dirs.clone(),
            exclude_sensitive: self.exclude_sensitive,
        }
    }
}
