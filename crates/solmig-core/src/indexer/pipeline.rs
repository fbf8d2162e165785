//! Analysis pass over fetched contract sources with Rayon-based parallelism.

use std::time::Instant;

use chrono::Utc;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::indexer::contracts::{extract_source, ExtractedFile};
use crate::indexer::graph::{build_dependency_graph, detect_upgradeable, infer_entry_points, EdgeKind};
use crate::indexer::parser::SourceParser;
use crate::models::{AnalysisResult, AnalysisStats, ContractKind, ParseFailure};
use crate::pipeline::key::RepoKey;

/// One contract file handed to the analysis pass. `content` is the fetch
/// outcome; a fetch failure is carried as its message.
#[derive(Clone, Debug)]
pub struct SourceInput {
    pub path: String,
    pub content: Result<String, String>,
}

impl SourceInput {
    pub fn fetched(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Ok(content.into()),
        }
    }

    pub fn failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Err(message.into()),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AnalysisOptions {
    pub workers: usize,
    pub max_source_bytes: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            max_source_bytes: 1024 * 1024,
        }
    }
}

struct FileExtraction {
    path: String,
    outcome: Result<ExtractedFile, String>,
}

fn extract_file_worker(
    parser: &mut Result<SourceParser, String>,
    input: &SourceInput,
    max_source_bytes: usize,
) -> FileExtraction {
    let outcome = match (&input.content, parser) {
        (Err(message), _) => Err(format!("fetch failed: {message}")),
        (Ok(source), _) if source.len() > max_source_bytes => Err(format!(
            "source is {} bytes, limit is {max_source_bytes}",
            source.len()
        )),
        (Ok(_), Err(message)) => Err(message.clone()),
        (Ok(source), Ok(parser)) => match extract_source(parser, &input.path, source) {
            Ok(extracted) => Ok(extracted),
            Err(crate::errors::MigrationError::Parse { message, .. }) => Err(message),
            Err(other) => Err(other.to_string()),
        },
    };
    FileExtraction {
        path: input.path.clone(),
        outcome,
    }
}

fn new_worker_parser() -> Result<SourceParser, String> {
    SourceParser::new().map_err(|e| e.to_string())
}

fn parallel_extract(inputs: &[SourceInput], options: &AnalysisOptions) -> Vec<FileExtraction> {
    if inputs.is_empty() {
        return vec![];
    }
    let max_bytes = options.max_source_bytes;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .build();

    match pool {
        Ok(pool) => pool.install(|| {
            inputs
                .par_iter()
                .map_init(new_worker_parser, |parser, input| {
                    extract_file_worker(parser, input, max_bytes)
                })
                .collect()
        }),
        Err(err) => {
            warn!("Failed to build analysis thread pool, extracting sequentially: {err}");
            let mut parser = new_worker_parser();
            inputs
                .iter()
                .map(|input| extract_file_worker(&mut parser, input, max_bytes))
                .collect()
        }
    }
}

/// SHA-256 over every successfully fetched path and its content, in input
/// order. Two runs over identical sources share a digest.
pub fn source_digest(inputs: &[SourceInput]) -> String {
    let mut hasher = Sha256::new();
    for input in inputs {
        if let Ok(content) = &input.content {
            hasher.update(input.path.as_bytes());
            hasher.update([0u8]);
            hasher.update(content.as_bytes());
            hasher.update([0u8]);
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Run extraction over `inputs` and assemble the repository-wide analysis.
///
/// `files_scanned` is the size of the whole repository tree; files that were
/// not handed in as inputs count as skipped. Per-file failures never abort
/// the pass: they are recorded in `parse_errors` and the remaining files
/// still contribute units.
pub fn analyze_sources(
    key: RepoKey,
    files_scanned: usize,
    inputs: Vec<SourceInput>,
    options: &AnalysisOptions,
) -> AnalysisResult {
    let started = Instant::now();
    let extractions = parallel_extract(&inputs, options);

    let mut contracts = Vec::new();
    let mut parse_errors = Vec::new();
    let mut files_parsed = 0usize;
    for extraction in extractions {
        match extraction.outcome {
            Ok(file) => {
                files_parsed += 1;
                contracts.extend(file.contracts);
            }
            Err(message) => {
                warn!(file = %extraction.path, "skipping unparseable file: {message}");
                parse_errors.push(ParseFailure {
                    file_path: extraction.path,
                    message,
                });
            }
        }
    }

    let dependency_graph = build_dependency_graph(&contracts);
    let entry_points = infer_entry_points(&contracts, &dependency_graph);
    let upgradeable = detect_upgradeable(&contracts);

    let count_kind = |kind: ContractKind| contracts.iter().filter(|c| c.kind == kind).count();
    let stats = AnalysisStats {
        files_scanned,
        files_parsed,
        files_skipped: files_scanned.saturating_sub(inputs.len()),
        contracts: count_kind(ContractKind::Contract),
        abstract_contracts: count_kind(ContractKind::Abstract),
        interfaces: count_kind(ContractKind::Interface),
        libraries: count_kind(ContractKind::Library),
        functions: contracts.iter().map(|c| c.functions.len()).sum(),
        state_variables: contracts.iter().map(|c| c.state_variables.len()).sum(),
        import_edges: dependency_graph.edge_count_of(EdgeKind::Import),
        inheritance_edges: dependency_graph.edge_count_of(EdgeKind::Inheritance),
        unresolved_references: dependency_graph.unresolved_references().len(),
        upgradeable_contracts: upgradeable.value.len(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    info!(
        repo = %key,
        files_parsed,
        parse_errors = parse_errors.len(),
        contracts = contracts.len(),
        elapsed_ms = stats.elapsed_ms,
        "analysis complete"
    );

    AnalysisResult {
        key,
        source_files: inputs.iter().map(|i| i.path.clone()).collect(),
        source_digest: source_digest(&inputs),
        contracts,
        dependency_graph,
        entry_points,
        upgradeable,
        stats,
        parse_errors,
        analyzed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RepoKey {
        RepoKey::parse("acme/vaults").unwrap()
    }

    #[test]
    fn test_analyze_token_sale() {
        let inputs = vec![
            SourceInput::fetched("src/Token.sol", "contract Token {}"),
            SourceInput::fetched(
                "src/Sale.sol",
                "import \"./Token.sol\";\ncontract Sale is Token {}",
            ),
        ];
        let result = analyze_sources(key(), 3, inputs, &AnalysisOptions::default());

        assert_eq!(result.contracts.len(), 2);
        assert_eq!(result.entry_points.value, vec!["Sale"]);
        assert_eq!(result.stats.files_parsed, 2);
        assert_eq!(result.stats.files_skipped, 1);
        assert_eq!(result.stats.import_edges, 1);
        assert_eq!(result.stats.inheritance_edges, 1);
        assert_eq!(result.source_files, vec!["src/Token.sol", "src/Sale.sol"]);
        assert!(result.parse_errors.is_empty());
    }

    #[test]
    fn test_broken_file_recorded_and_others_continue() {
        let inputs = vec![
            SourceInput::fetched("src/Good.sol", "contract Good {}"),
            SourceInput::fetched("src/Bad.sol", "contract Bad {\n function ( {\n"),
            SourceInput::failed("src/Gone.sol", "404"),
        ];
        let result = analyze_sources(key(), 3, inputs, &AnalysisOptions::default());

        assert_eq!(result.contracts.len(), 1);
        assert_eq!(result.contracts[0].name, "Good");
        let failed: Vec<&str> = result
            .parse_errors
            .iter()
            .map(|e| e.file_path.as_str())
            .collect();
        assert_eq!(failed, vec!["src/Bad.sol", "src/Gone.sol"]);
        assert!(result.parse_errors[0].message.contains("line"));
        assert!(result.parse_errors[1].message.contains("404"));
    }

    #[test]
    fn test_oversized_source_is_a_parse_error() {
        let inputs = vec![SourceInput::fetched("src/Big.sol", "contract Big {}")];
        let options = AnalysisOptions {
            workers: 1,
            max_source_bytes: 4,
        };
        let result = analyze_sources(key(), 1, inputs, &options);
        assert!(result.contracts.is_empty());
        assert_eq!(result.parse_errors.len(), 1);
    }

    #[test]
    fn test_analysis_is_deterministic_across_worker_counts() {
        let inputs: Vec<SourceInput> = (0..12)
            .map(|i| {
                let parent = if i == 0 {
                    String::new()
                } else {
                    format!(" is C{}", i - 1)
                };
                SourceInput::fetched(format!("src/C{i}.sol"), format!("contract C{i}{parent} {{}}"))
            })
            .collect();
        let one = analyze_sources(
            key(),
            12,
            inputs.clone(),
            &AnalysisOptions {
                workers: 1,
                max_source_bytes: 1 << 20,
            },
        );
        let many = analyze_sources(
            key(),
            12,
            inputs,
            &AnalysisOptions {
                workers: 6,
                max_source_bytes: 1 << 20,
            },
        );
        assert_eq!(one.contracts, many.contracts);
        assert_eq!(one.dependency_graph, many.dependency_graph);
        assert_eq!(one.source_digest, many.source_digest);
        assert_eq!(one.entry_points.value.len(), 11);
    }
}
