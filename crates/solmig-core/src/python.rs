//! PyO3 bindings. Structured results cross the boundary as JSON strings.

use std::collections::BTreeMap;
use std::path::PathBuf;

use pyo3::prelude::*;

use crate::config::PipelineConfig;
use crate::errors::MigrationError;
use crate::indexer::{filesystem, parser, pipeline as extraction};
use crate::models::AnalysisResult;
use crate::pipeline::key::RepoKey;
use crate::pipeline::local;
use crate::report::consistency::{self, ConsistencyRules, TransformedSource};

fn to_json<T: serde::Serialize>(value: &T) -> PyResult<String> {
    serde_json::to_string(value).map_err(|e| MigrationError::from(e).into())
}

#[pyfunction]
pub fn grammar_capability_report() -> PyResult<String> {
    to_json(&parser::grammar_capability_report())
}

#[pyfunction]
pub fn compute_content_hash(path: PathBuf) -> PyResult<String> {
    Ok(filesystem::compute_content_hash(&path)?)
}

#[pyfunction]
pub fn parse_repo_key(identifier: &str) -> PyResult<(String, String)> {
    let key = RepoKey::parse(identifier)?;
    Ok((key.owner, key.name))
}

/// Analyse in-memory sources (`path -> text`) and return the result as JSON.
#[pyfunction]
#[pyo3(signature = (repo, sources, workers = None))]
pub fn analyze_sources(
    py: Python<'_>,
    repo: &str,
    sources: BTreeMap<String, String>,
    workers: Option<usize>,
) -> PyResult<String> {
    let key = RepoKey::parse(repo)?;
    let mut config = PipelineConfig::default();
    if let Some(workers) = workers {
        config.analysis_workers = workers;
    }
    let options = config.clamped().analysis_options();
    let total = sources.len();
    let inputs = sources
        .into_iter()
        .map(|(path, text)| extraction::SourceInput::fetched(path, text))
        .collect();
    let analysis = py.allow_threads(|| extraction::analyze_sources(key, total, inputs, &options));
    to_json(&analysis)
}

#[pyfunction]
#[pyo3(signature = (root, config_path = None))]
pub fn analyze_directory(
    py: Python<'_>,
    root: PathBuf,
    config_path: Option<PathBuf>,
) -> PyResult<String> {
    let config = PipelineConfig::load(config_path.as_deref())?;
    let analysis = py.allow_threads(|| local::analyze_directory(&root, &config))?;
    to_json(&analysis)
}

/// Check transformed sources (`path -> code`) against a JSON analysis.
#[pyfunction]
pub fn validate_consistency(
    analysis_json: &str,
    transformed: BTreeMap<String, String>,
) -> PyResult<String> {
    let analysis: AnalysisResult =
        serde_json::from_str(analysis_json).map_err(MigrationError::from)?;
    let sources: Vec<TransformedSource<'_>> = transformed
        .iter()
        .map(|(path, code)| TransformedSource {
            file_path: path.as_str(),
            code: code.as_str(),
        })
        .collect();
    let report =
        consistency::validate_consistency(&analysis, &sources, &ConsistencyRules::default());
    to_json(&report)
}
