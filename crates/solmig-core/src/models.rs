//! Shared typed models used across ingestion, analysis, planning and reporting.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indexer::graph::DependencyGraph;
use crate::pipeline::key::RepoKey;
use crate::report::consistency::ConsistencyReport;

// ---------------------------------------------------------------------------
// Repository ingestion
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryVisibility {
    Public,
    Private,
}

/// Metadata describing a fetched repository. Never mutated after fetch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub owner: String,
    pub name: String,
    pub url: String,
    pub default_branch: String,
    pub visibility: RepositoryVisibility,
    /// Repository size in KiB.
    pub size_kb: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Contract,
    Test,
    Script,
    Vendor,
    Config,
    Docs,
    Other,
}

const VENDOR_SEGMENTS: &[&str] = &["node_modules", "lib"];
const TEST_SEGMENTS: &[&str] = &["test", "tests"];
const SCRIPT_SEGMENTS: &[&str] = &["script", "scripts"];
const CONFIG_FILES: &[&str] = &[
    "foundry.toml",
    "remappings.txt",
    "package.json",
    "truffle-config.js",
    "brownie-config.yaml",
];

impl FileCategory {
    /// Classify a repository-relative path.
    pub fn classify(path: &str) -> FileCategory {
        let normalized = path.replace('\\', "/");
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        let Some((file_name, dirs)) = segments.split_last() else {
            return FileCategory::Other;
        };
        let in_dir = |names: &[&str]| dirs.iter().any(|d| names.contains(d));

        if in_dir(VENDOR_SEGMENTS) {
            return FileCategory::Vendor;
        }
        if file_name.ends_with(".sol") {
            if file_name.ends_with(".t.sol") || in_dir(TEST_SEGMENTS) {
                return FileCategory::Test;
            }
            if file_name.ends_with(".s.sol") || in_dir(SCRIPT_SEGMENTS) {
                return FileCategory::Script;
            }
            return FileCategory::Contract;
        }
        if CONFIG_FILES.contains(file_name) || file_name.starts_with("hardhat.config.") {
            return FileCategory::Config;
        }
        if file_name.to_lowercase().ends_with(".md") {
            return FileCategory::Docs;
        }
        FileCategory::Other
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub path: String,
    pub name: String,
    pub size_bytes: u64,
    pub category: FileCategory,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub path: String,
    pub files: Vec<FileNode>,
    pub directories: Vec<DirectoryNode>,
}

impl DirectoryNode {
    /// Depth-first iterator over every file under this directory.
    pub fn iter_files(&self) -> Box<dyn Iterator<Item = &FileNode> + '_> {
        Box::new(
            self.files
                .iter()
                .chain(self.directories.iter().flat_map(|d| d.iter_files())),
        )
    }
}

/// Directory tree of a repository plus aggregate counts by category.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryTree {
    pub root: DirectoryNode,
    pub counts: BTreeMap<FileCategory, usize>,
}

impl RepositoryTree {
    /// Build a tree from flat repository-relative file entries `(path, size)`.
    ///
    /// Paths are sorted first so the resulting tree is independent of the
    /// order the entries were listed in.
    pub fn from_paths<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut flat: Vec<(String, u64)> = entries
            .into_iter()
            .map(|(p, size)| (p.into().replace('\\', "/").trim_matches('/').to_string(), size))
            .filter(|(p, _)| !p.is_empty())
            .collect();
        flat.sort();
        flat.dedup_by(|a, b| a.0 == b.0);

        let mut root = DirectoryNode::default();
        let mut counts: BTreeMap<FileCategory, usize> = BTreeMap::new();
        for (path, size) in flat {
            let category = FileCategory::classify(&path);
            *counts.entry(category).or_default() += 1;

            let parts: Vec<&str> = path.split('/').collect();
            let (name, dirs) = match parts.split_last() {
                Some(split) => split,
                None => continue,
            };
            let mut node = &mut root;
            let mut prefix = String::new();
            for dir in dirs {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(dir);
                let idx = match node.directories.iter().position(|d| d.path == prefix) {
                    Some(idx) => idx,
                    None => {
                        node.directories.push(DirectoryNode {
                            path: prefix.clone(),
                            ..DirectoryNode::default()
                        });
                        node.directories.len() - 1
                    }
                };
                node = &mut node.directories[idx];
            }
            node.files.push(FileNode {
                path: path.clone(),
                name: name.to_string(),
                size_bytes: size,
                category,
            });
        }
        RepositoryTree { root, counts }
    }

    pub fn files(&self) -> impl Iterator<Item = &FileNode> {
        self.root.iter_files()
    }

    /// Files that feed the analysis stage, in path order.
    pub fn contract_files(&self) -> Vec<&FileNode> {
        let mut files: Vec<&FileNode> = self
            .files()
            .filter(|f| f.category == FileCategory::Contract)
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    pub fn total_files(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Output of the ingest stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestResult {
    pub key: RepoKey,
    pub metadata: RepositoryMetadata,
    pub tree: RepositoryTree,
    /// File contents captured at ingest time (local repositories only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<BTreeMap<String, String>>,
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Structural model
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Contract,
    Abstract,
    Interface,
    Library,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::Contract => "contract",
            ContractKind::Abstract => "abstract",
            ContractKind::Interface => "interface",
            ContractKind::Library => "library",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    External,
    Internal,
    Private,
}

impl Visibility {
    pub fn parse(token: &str) -> Option<Visibility> {
        match token.trim() {
            "public" => Some(Visibility::Public),
            "external" => Some(Visibility::External),
            "internal" => Some(Visibility::Internal),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }

    /// Whether a function with this visibility is part of the callable surface.
    pub fn is_exposed(&self) -> bool {
        matches!(self, Visibility::Public | Visibility::External)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    Pure,
    View,
    Payable,
    Nonpayable,
}

impl Mutability {
    pub fn parse(token: &str) -> Option<Mutability> {
        match token.trim() {
            "pure" => Some(Mutability::Pure),
            "view" => Some(Mutability::View),
            "payable" => Some(Mutability::Payable),
            "nonpayable" => Some(Mutability::Nonpayable),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutability: Option<Mutability>,
    pub parameter_count: usize,
    pub return_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVariable {
    pub name: String,
    /// Declared type exactly as written in source.
    pub type_name: String,
    pub visibility: Visibility,
    pub constant: bool,
    pub immutable: bool,
}

/// One top-level contract, abstract contract, interface or library.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractUnit {
    pub name: String,
    pub kind: ContractKind,
    pub file_path: String,
    pub imports: Vec<String>,
    pub inherits: Vec<String>,
    pub functions: Vec<FunctionSignature>,
    pub state_variables: Vec<StateVariable>,
    pub uses_upgradeable_pattern: bool,
    /// Upgrade-pattern tokens that matched the declaration text.
    #[serde(default)]
    pub upgrade_markers: Vec<String>,
}

/// A best-effort inference, tagged so it is never mistaken for ground truth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Heuristic<T> {
    pub value: T,
    pub confidence: f64,
    pub rationale: String,
}

impl<T> Heuristic<T> {
    pub fn new(value: T, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
        }
    }
}

/// A file that could not be parsed or fetched during analysis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub file_path: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub files_scanned: usize,
    pub files_parsed: usize,
    pub files_skipped: usize,
    pub contracts: usize,
    pub abstract_contracts: usize,
    pub interfaces: usize,
    pub libraries: usize,
    pub functions: usize,
    pub state_variables: usize,
    pub import_edges: usize,
    pub inheritance_edges: usize,
    pub unresolved_references: usize,
    pub upgradeable_contracts: usize,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub key: RepoKey,
    pub contracts: Vec<ContractUnit>,
    pub dependency_graph: DependencyGraph,
    pub entry_points: Heuristic<Vec<String>>,
    pub upgradeable: Heuristic<Vec<String>>,
    pub stats: AnalysisStats,
    pub parse_errors: Vec<ParseFailure>,
    /// Repository-relative paths that were analysed, in order.
    pub source_files: Vec<String>,
    /// SHA-256 over every analysed path and its content.
    pub source_digest: String,
    pub analyzed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationCategory {
    Architecture,
    Security,
    Gas,
    Upgradeability,
    Compatibility,
    Testing,
    #[serde(other)]
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    #[serde(alias = "High", alias = "HIGH")]
    High,
    #[serde(alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "Low", alias = "LOW")]
    Low,
}

impl ConfidenceLevel {
    /// Numeric weight used when aggregating per-file confidence.
    pub fn weight(&self) -> f64 {
        match self {
            ConfidenceLevel::High => 0.9,
            ConfidenceLevel::Medium => 0.7,
            ConfidenceLevel::Low => 0.4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_name: Option<String>,
    pub category: RecommendationCategory,
    pub description: String,
    #[serde(default)]
    pub rationale: String,
    pub confidence_level: ConfidenceLevel,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractSummary {
    pub name: String,
    pub kind: ContractKind,
    pub file_path: String,
    pub inherits: Vec<String>,
    pub external_functions: usize,
    pub state_variables: usize,
    pub upgradeable: bool,
}

/// Structured context handed to the recommendation generator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub key: RepoKey,
    pub contracts: Vec<ContractSummary>,
    pub entry_points: Vec<String>,
    pub upgradeable: Vec<String>,
    pub unresolved_references: Vec<String>,
    pub stats: AnalysisStats,
}

impl AnalysisSummary {
    pub fn from_analysis(analysis: &AnalysisResult) -> Self {
        let contracts = analysis
            .contracts
            .iter()
            .map(|c| ContractSummary {
                name: c.name.clone(),
                kind: c.kind,
                file_path: c.file_path.clone(),
                inherits: c.inherits.clone(),
                external_functions: c.functions.len(),
                state_variables: c.state_variables.len(),
                upgradeable: c.uses_upgradeable_pattern,
            })
            .collect();
        AnalysisSummary {
            key: analysis.key.clone(),
            contracts,
            entry_points: analysis.entry_points.value.clone(),
            upgradeable: analysis.upgradeable.value.clone(),
            unresolved_references: analysis
                .dependency_graph
                .unresolved_references()
                .into_iter()
                .map(str::to_string)
                .collect(),
            stats: analysis.stats.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// How the recommendation generator's output was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorOutput {
    Valid,
    Malformed,
    Unavailable,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub key: RepoKey,
    pub summary: AnalysisSummary,
    pub recommendations: Vec<Recommendation>,
    pub by_category: BTreeMap<RecommendationCategory, usize>,
    pub risk_level: RiskLevel,
    pub generator_output: GeneratorOutput,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Transformation
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformRequest {
    pub key: RepoKey,
    pub file_path: String,
    pub source: String,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformAction {
    Apply,
    Skip,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub description: String,
    /// Index into the request's recommendation list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceLevel>,
}

/// Parsed transformer response for one file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformResponse {
    pub action: TransformAction,
    #[serde(default)]
    pub applied_changes: Vec<AppliedChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformed_code: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file_path: String,
    pub action: TransformAction,
    pub applied_changes: Vec<AppliedChange>,
    pub recommendations_total: usize,
    pub recommendations_skipped: usize,
    pub confidence: f64,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformed_code: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformationReport {
    pub key: RepoKey,
    pub files: Vec<FileOutcome>,
    pub files_modified: usize,
    pub files_skipped: usize,
    pub total_changes: usize,
    pub overall_confidence: f64,
    pub warnings: Vec<String>,
    pub consistency: ConsistencyReport,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBucket {
    High,
    Medium,
    Low,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub confidence_score: f64,
    pub confidence_bucket: ConfidenceBucket,
    pub passed: bool,
    pub next_steps: Vec<String>,
}

/// Cached artifact of the transform stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformOutcome {
    pub transformation: TransformationReport,
    pub validation: ValidationReport,
}
