//! Staged migration pipeline: ingest, analyze, plan, transform.

pub mod cache;
pub mod collaborators;
pub mod key;
pub mod local;
pub mod orchestrator;

pub use cache::{PipelineCache, Stage};
pub use key::RepoKey;
pub use orchestrator::MigrationPipeline;
