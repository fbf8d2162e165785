//! Cross-file consistency checks over transformed sources.
//!
//! Checks are lexical and structural only: imports must still point at a
//! known contract file or an external package, and every inheritance parent
//! must be declared somewhere or follow an external naming convention.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::indexer::contracts::{extract_source, ExtractedFile};
use crate::indexer::imports::{check_import, ImportResolution};
use crate::indexer::parser::SourceParser;
use crate::models::AnalysisResult;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// True iff at least one transformed file was validated.
    pub checked: bool,
    pub imports_valid: bool,
    pub inheritance_valid: bool,
    pub issues: Vec<String>,
    #[serde(default)]
    pub files_checked: usize,
    /// Transformed files whose code no longer parses.
    #[serde(default)]
    pub syntax_errors: usize,
}

impl Default for ConsistencyReport {
    fn default() -> Self {
        Self {
            checked: false,
            imports_valid: true,
            inheritance_valid: true,
            issues: vec![],
            files_checked: 0,
            syntax_errors: 0,
        }
    }
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.imports_valid && self.inheritance_valid && self.syntax_errors == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConsistencyRules {
    pub external_import_prefixes: Vec<String>,
    pub external_parent_names: Vec<String>,
}

impl ConsistencyRules {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            external_import_prefixes: config.external_import_prefixes.clone(),
            external_parent_names: config.external_parent_names.clone(),
        }
    }
}

impl Default for ConsistencyRules {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Transformed code for one file, as returned by the transformer.
#[derive(Clone, Copy, Debug)]
pub struct TransformedSource<'a> {
    pub file_path: &'a str,
    pub code: &'a str,
}

fn matches_name_pattern(name: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else {
        name == pattern
    }
}

/// `I` followed by an uppercase letter, or a configured base name.
pub fn is_external_parent(name: &str, patterns: &[String]) -> bool {
    let simple = name.rsplit('.').next().unwrap_or(name);
    let mut chars = simple.chars();
    if chars.next() == Some('I') && chars.next().is_some_and(|c| c.is_ascii_uppercase()) {
        return true;
    }
    patterns.iter().any(|p| matches_name_pattern(simple, p))
}

/// Validate already extracted transformed files against the analysis.
pub fn validate_extracted(
    analysis: &AnalysisResult,
    files: &[ExtractedFile],
    rules: &ConsistencyRules,
) -> ConsistencyReport {
    let mut report = ConsistencyReport::default();
    if files.is_empty() {
        return report;
    }

    let mut known_paths: HashSet<String> =
        analysis.contracts.iter().map(|c| c.file_path.clone()).collect();
    let mut declared: HashSet<&str> = analysis.contracts.iter().map(|c| c.name.as_str()).collect();
    for file in files {
        known_paths.insert(file.file_path.clone());
        declared.extend(file.contracts.iter().map(|c| c.name.as_str()));
    }

    for file in files {
        report.files_checked += 1;
        for import in &file.imports {
            if let ImportResolution::Unresolved(resolved) = check_import(
                &file.file_path,
                import,
                &known_paths,
                &rules.external_import_prefixes,
            ) {
                report.imports_valid = false;
                report.issues.push(format!(
                    "{}: import \"{import}\" resolves to {resolved}, which is not a known contract file",
                    file.file_path
                ));
            }
        }
        for contract in &file.contracts {
            for parent in &contract.inherits {
                let simple = parent.rsplit('.').next().unwrap_or(parent);
                if declared.contains(parent.as_str()) || declared.contains(simple) {
                    continue;
                }
                if is_external_parent(parent, &rules.external_parent_names) {
                    continue;
                }
                report.inheritance_valid = false;
                report.issues.push(format!(
                    "{}: contract {} inherits {parent}, which is not declared",
                    file.file_path, contract.name
                ));
            }
        }
    }
    report.checked = report.files_checked > 0;
    report
}

/// Re-extract transformed code and validate it. Files whose code no longer
/// parses are counted and reported; the rest are checked structurally.
pub fn validate_consistency(
    analysis: &AnalysisResult,
    transformed: &[TransformedSource<'_>],
    rules: &ConsistencyRules,
) -> ConsistencyReport {
    let mut extracted = Vec::new();
    let mut syntax_issues = Vec::new();
    match SourceParser::new() {
        Ok(mut parser) => {
            for source in transformed {
                match extract_source(&mut parser, source.file_path, source.code) {
                    Ok(file) => extracted.push(file),
                    Err(err) => syntax_issues.push(format!(
                        "{}: transformed code failed to parse: {err}",
                        source.file_path
                    )),
                }
            }
        }
        Err(err) => syntax_issues.push(format!("consistency check unavailable: {err}")),
    }

    let mut report = validate_extracted(analysis, &extracted, rules);
    report.syntax_errors = syntax_issues.len();
    report.files_checked += syntax_issues.len().min(transformed.len());
    report.checked = report.files_checked > 0;
    report.issues.extend(syntax_issues);
    debug!(
        files = report.files_checked,
        issues = report.issues.len(),
        "consistency validation finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::pipeline::{analyze_sources, AnalysisOptions, SourceInput};
    use crate::pipeline::key::RepoKey;

    fn analysis(files: &[(&str, &str)]) -> AnalysisResult {
        let inputs = files
            .iter()
            .map(|(path, src)| SourceInput::fetched(*path, *src))
            .collect();
        analyze_sources(
            RepoKey::parse("acme/vaults").unwrap(),
            files.len(),
            inputs,
            &AnalysisOptions::default(),
        )
    }

    fn validate(analysis: &AnalysisResult, files: &[(&str, &str)]) -> ConsistencyReport {
        let transformed: Vec<TransformedSource<'_>> = files
            .iter()
            .map(|(file_path, code)| TransformedSource {
                file_path: *file_path,
                code: *code,
            })
            .collect();
        validate_consistency(analysis, &transformed, &ConsistencyRules::default())
    }

    #[test]
    fn test_missing_relative_import_is_broken() {
        let base = analysis(&[("src/Token.sol", "contract Token {}")]);
        let report = validate(
            &base,
            &[(
                "src/Sale.sol",
                "import \"./Missing.sol\";\nimport \"./Token.sol\";\ncontract Sale is Token {}",
            )],
        );
        assert!(report.checked);
        assert!(!report.imports_valid);
        assert!(report.inheritance_valid);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].contains("src/Sale.sol"));
        assert!(report.issues[0].contains("./Missing.sol"));
    }

    #[test]
    fn test_external_imports_and_parents_are_accepted() {
        let base = analysis(&[("src/Token.sol", "contract Token {}")]);
        let report = validate(
            &base,
            &[(
                "src/Vault.sol",
                "import \"@openzeppelin/contracts/access/Ownable.sol\";\n\
                 import \"forge-std/console.sol\";\n\
                 contract Vault is Ownable, IVault, ERC4626, PausableUpgradeable, Token {}",
            )],
        );
        assert!(report.is_consistent(), "{:?}", report.issues);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_undeclared_parent_is_broken() {
        let base = analysis(&[("src/Token.sol", "contract Token {}")]);
        let report = validate(&base, &[("src/Sale.sol", "contract Sale is Tokn {}")]);
        assert!(report.imports_valid);
        assert!(!report.inheritance_valid);
        assert_eq!(
            report.issues,
            vec!["src/Sale.sol: contract Sale inherits Tokn, which is not declared"]
        );
    }

    #[test]
    fn test_parents_declared_in_other_transformed_files() {
        let base = analysis(&[]);
        let report = validate(
            &base,
            &[
                ("src/Base.sol", "abstract contract Base {}"),
                ("src/Impl.sol", "import \"./Base.sol\";\ncontract Impl is Base {}"),
            ],
        );
        assert!(report.is_consistent(), "{:?}", report.issues);
        assert_eq!(report.files_checked, 2);
    }

    #[test]
    fn test_unparseable_transformed_code_counts_as_syntax_error() {
        let base = analysis(&[("src/Token.sol", "contract Token {}")]);
        let report = validate(&base, &[("src/Token.sol", "contract Token {")]);
        assert!(report.checked);
        assert_eq!(report.syntax_errors, 1);
        assert!(!report.is_consistent());
        assert!(report.issues[0].starts_with("src/Token.sol: transformed code failed to parse"));
    }

    #[test]
    fn test_nothing_transformed_is_unchecked() {
        let base = analysis(&[("src/Token.sol", "contract Token {}")]);
        let report = validate(&base, &[]);
        assert!(!report.checked);
        assert!(report.imports_valid && report.inheritance_valid);
    }

    #[test]
    fn test_external_parent_convention() {
        let patterns = vec!["ERC*".to_string(), "*Upgradeable".to_string(), "Context".to_string()];
        assert!(is_external_parent("IERC20", &patterns));
        assert!(is_external_parent("ERC721", &patterns));
        assert!(is_external_parent("OwnableUpgradeable", &patterns));
        assert!(is_external_parent("oz.Context", &patterns));
        assert!(!is_external_parent("Index", &patterns));
        assert!(!is_external_parent("Token", &patterns));
    }
}
