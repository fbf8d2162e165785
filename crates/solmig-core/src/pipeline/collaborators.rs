//! Contracts for external collaborators and parsing of their raw output.
//!
//! Generator and transformer responses are untrusted text. They are parsed
//! into [`Untrusted`] so every caller has to handle the malformed case
//! explicitly instead of crashing on it.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::errors::MigrationResult;
use crate::guards::{truncate_text, MAX_RAW_OUTPUT_CHARS};
use crate::models::{
    AnalysisSummary, ConfidenceLevel, Recommendation, RecommendationCategory,
    RepositoryMetadata, RepositoryTree, TransformRequest, TransformResponse,
};
use crate::pipeline::key::RepoKey;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait RepositoryClient: Send + Sync {
    async fn fetch_metadata(&self, key: &RepoKey) -> MigrationResult<RepositoryMetadata>;

    async fn fetch_tree(&self, key: &RepoKey) -> MigrationResult<RepositoryTree>;

    async fn fetch_file_content(&self, key: &RepoKey, path: &str) -> MigrationResult<String>;

    /// Contract sources the client already holds in memory, if any. Remote
    /// clients fetch lazily and return `None`.
    async fn prefetched_sources(
        &self,
        _key: &RepoKey,
        _tree: &RepositoryTree,
    ) -> MigrationResult<Option<BTreeMap<String, String>>> {
        Ok(None)
    }
}

/// Produces migration recommendations as raw (ideally JSON) text.
#[async_trait::async_trait]
pub trait RecommendationGenerator: Send + Sync {
    async fn generate(&self, summary: &AnalysisSummary) -> MigrationResult<String>;
}

/// Rewrites one file as raw (ideally JSON) text.
#[async_trait::async_trait]
pub trait CodeTransformer: Send + Sync {
    async fn transform(&self, request: &TransformRequest) -> MigrationResult<String>;
}

// ---------------------------------------------------------------------------
// Untrusted output
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum Untrusted<T> {
    Valid(T),
    Malformed { raw: String, reason: String },
}

impl<T> Untrusted<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Untrusted::Valid(_))
    }

    pub fn valid(self) -> Option<T> {
        match self {
            Untrusted::Valid(value) => Some(value),
            Untrusted::Malformed { .. } => None,
        }
    }

    fn malformed(raw: &str, reason: impl Into<String>) -> Self {
        Untrusted::Malformed {
            raw: truncate_text(raw, MAX_RAW_OUTPUT_CHARS),
            reason: reason.into(),
        }
    }
}

static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```").unwrap());

/// Body of the first markdown code fence, or the trimmed text when there is
/// none.
pub fn strip_code_fences(raw: &str) -> &str {
    match CODE_FENCE_RE.captures(raw).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim(),
        None => raw.trim(),
    }
}

pub fn parse_untrusted<T: DeserializeOwned>(raw: &str) -> Untrusted<T> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Untrusted::malformed(raw, "empty response");
    }
    match serde_json::from_str::<T>(body) {
        Ok(value) => Untrusted::Valid(value),
        Err(err) => Untrusted::malformed(raw, err.to_string()),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecommendationPayload {
    List(Vec<Recommendation>),
    Wrapped { recommendations: Vec<Recommendation> },
}

/// Accepts a bare JSON array or an object with a `recommendations` array.
pub fn parse_recommendations(raw: &str) -> Untrusted<Vec<Recommendation>> {
    match parse_untrusted::<RecommendationPayload>(raw) {
        Untrusted::Valid(RecommendationPayload::List(recs))
        | Untrusted::Valid(RecommendationPayload::Wrapped {
            recommendations: recs,
        }) => Untrusted::Valid(recs),
        Untrusted::Malformed { raw, reason } => Untrusted::Malformed { raw, reason },
    }
}

pub fn parse_transform_response(raw: &str) -> Untrusted<TransformResponse> {
    parse_untrusted(raw)
}

pub const FALLBACK_RATIONALE: &str =
    "Recommendation response parsing requires verification; the generator output was not valid JSON";

/// Single "needs review" recommendation used when generator output cannot
/// be parsed.
pub fn fallback_recommendation(reason: &str) -> Recommendation {
    Recommendation {
        file_path: String::new(),
        contract_name: None,
        category: RecommendationCategory::Architecture,
        description: format!(
            "Manual review required: automated recommendations could not be parsed ({reason})"
        ),
        rationale: FALLBACK_RATIONALE.to_string(),
        confidence_level: ConfidenceLevel::Low,
    }
}
