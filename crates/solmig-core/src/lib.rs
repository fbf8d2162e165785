//! solmig core library: analysis and migration pipeline for Solidity
//! repositories.
//!
//! The indexer extracts contract units and the dependency graph from
//! sources, the pipeline stages ingest/analyze/plan/transform behind a
//! single-flight cache, and the report layer scores transformation outcomes.
//! With the `python` feature the crate also builds as the `_solmig_core`
//! extension module.

pub mod config;
pub mod errors;
pub mod guards;
pub mod indexer;
pub mod models;
pub mod pipeline;
pub mod report;

#[cfg(feature = "python")]
mod python;

#[cfg(feature = "python")]
use pyo3::prelude::*;

// ---------------------------------------------------------------------------
// Top-level Python module: _solmig_core
// ---------------------------------------------------------------------------

#[cfg(feature = "python")]
#[pymodule]
fn _solmig_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    use pyo3::wrap_pyfunction;

    // -- Guards -------------------------------------------------------------
    m.add("MIN_CACHE_TTL_SECS", guards::MIN_CACHE_TTL_SECS)?;
    m.add("MAX_CACHE_TTL_SECS", guards::MAX_CACHE_TTL_SECS)?;
    m.add("MAX_REPOSITORIES", guards::MAX_REPOSITORIES)?;
    m.add("MAX_ANALYSIS_WORKERS", guards::MAX_ANALYSIS_WORKERS)?;
    m.add("MAX_SOURCE_BYTES", guards::MAX_SOURCE_BYTES)?;

    // -- Indexer ------------------------------------------------------------
    m.add_function(wrap_pyfunction!(python::grammar_capability_report, m)?)?;
    m.add_function(wrap_pyfunction!(python::compute_content_hash, m)?)?;
    m.add_function(wrap_pyfunction!(python::analyze_sources, m)?)?;
    m.add_function(wrap_pyfunction!(python::analyze_directory, m)?)?;

    // -- Pipeline / report --------------------------------------------------
    m.add_function(wrap_pyfunction!(python::parse_repo_key, m)?)?;
    m.add_function(wrap_pyfunction!(python::validate_consistency, m)?)?;

    Ok(())
}
