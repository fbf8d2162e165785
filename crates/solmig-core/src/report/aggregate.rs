//! Confidence aggregation and validation scoring for transform outcomes.

use std::collections::BTreeSet;

use chrono::Utc;

use crate::models::{
    AppliedChange, ConfidenceBucket, ConfidenceLevel, FileOutcome, Recommendation,
    TransformAction, TransformResponse, TransformationReport, ValidationReport,
};
use crate::pipeline::key::RepoKey;
use crate::report::consistency::ConsistencyReport;

// Validation score buckets
const SCORE_CLEAN: f64 = 0.95;
const SCORE_WARNINGS: f64 = 0.8;
const SCORE_FEW_ERRORS: f64 = 0.5;
const SCORE_FLOOR: f64 = 0.1;
const ERROR_THRESHOLD: usize = 2;
const ERROR_PENALTY: f64 = 0.1;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn change_weight(change: &AppliedChange, recommendations: &[Recommendation]) -> f64 {
    change
        .confidence
        .or_else(|| {
            change
                .recommendation
                .and_then(|idx| recommendations.get(idx))
                .map(|r| r.confidence_level)
        })
        .unwrap_or(ConfidenceLevel::Medium)
        .weight()
}

/// Mean weight of the applied changes scaled by applied / (applied + skipped).
pub fn file_confidence(
    applied: &[AppliedChange],
    recommendations: &[Recommendation],
    skipped: usize,
) -> f64 {
    if applied.is_empty() {
        return 0.0;
    }
    let mean = applied
        .iter()
        .map(|c| change_weight(c, recommendations))
        .sum::<f64>()
        / applied.len() as f64;
    let coverage = applied.len() as f64 / (applied.len() + skipped) as f64;
    mean * coverage
}

/// Recommendations not covered by any applied change.
fn skipped_recommendations(applied: &[AppliedChange], total: usize) -> usize {
    let referenced: BTreeSet<usize> = applied
        .iter()
        .filter_map(|c| c.recommendation)
        .filter(|idx| *idx < total)
        .collect();
    // An index past the end names no recommendation; count it like a change
    // without one.
    let unreferenced_changes = applied
        .iter()
        .filter(|c| c.recommendation.map_or(true, |idx| idx >= total))
        .count();
    total.saturating_sub(referenced.len() + unreferenced_changes)
}

/// Outcome for a file the transformer did not produce usable output for.
pub fn skipped_outcome(
    file_path: &str,
    recommendations: &[Recommendation],
    reason: impl Into<String>,
    warnings: Vec<String>,
) -> FileOutcome {
    FileOutcome {
        file_path: file_path.to_string(),
        action: TransformAction::Skip,
        applied_changes: vec![],
        recommendations_total: recommendations.len(),
        recommendations_skipped: recommendations.len(),
        confidence: 0.0,
        warnings,
        skip_reason: Some(reason.into()),
        transformed_code: None,
    }
}

/// Fold a parsed transformer response into a per-file outcome.
pub fn file_outcome(
    file_path: &str,
    recommendations: &[Recommendation],
    response: &TransformResponse,
) -> FileOutcome {
    let mut warnings = response.warnings.clone();
    match response.action {
        TransformAction::Skip => {
            let reason = warnings
                .first()
                .cloned()
                .unwrap_or_else(|| "transformer chose to skip this file".to_string());
            skipped_outcome(file_path, recommendations, reason, warnings)
        }
        TransformAction::Apply if response.transformed_code.is_none() => {
            warnings.push("transformer reported apply without transformed code".to_string());
            skipped_outcome(
                file_path,
                recommendations,
                "no transformed code returned",
                warnings,
            )
        }
        TransformAction::Apply => {
            let applied = response.applied_changes.clone();
            let skipped = skipped_recommendations(&applied, recommendations.len());
            FileOutcome {
                file_path: file_path.to_string(),
                action: TransformAction::Apply,
                confidence: file_confidence(&applied, recommendations, skipped),
                recommendations_total: recommendations.len(),
                recommendations_skipped: skipped,
                applied_changes: applied,
                warnings,
                skip_reason: None,
                transformed_code: response.transformed_code.clone(),
            }
        }
    }
}

fn is_modified(outcome: &FileOutcome) -> bool {
    outcome.action == TransformAction::Apply && !outcome.applied_changes.is_empty()
}

pub fn aggregate_report(
    key: RepoKey,
    files: Vec<FileOutcome>,
    warnings: Vec<String>,
    consistency: ConsistencyReport,
) -> TransformationReport {
    let modified: Vec<&FileOutcome> = files.iter().filter(|f| is_modified(f)).collect();
    let overall_confidence = if modified.is_empty() {
        0.0
    } else {
        round2(modified.iter().map(|f| f.confidence).sum::<f64>() / modified.len() as f64)
    };
    let files_modified = modified.len();
    let total_changes = files.iter().map(|f| f.applied_changes.len()).sum();
    let files_skipped = files
        .iter()
        .filter(|f| f.action == TransformAction::Skip)
        .count();

    TransformationReport {
        key,
        files,
        files_modified,
        files_skipped,
        total_changes,
        overall_confidence,
        warnings,
        consistency,
        created_at: Utc::now(),
    }
}

pub fn validation_score(errors: usize, warnings: usize) -> (f64, ConfidenceBucket) {
    match (errors, warnings) {
        (0, 0) => (SCORE_CLEAN, ConfidenceBucket::High),
        (0, _) => (SCORE_WARNINGS, ConfidenceBucket::Medium),
        (e, _) if e <= ERROR_THRESHOLD => (SCORE_FEW_ERRORS, ConfidenceBucket::Low),
        (e, _) => {
            let penalty = ERROR_PENALTY * (e - ERROR_THRESHOLD) as f64;
            (round2((SCORE_FEW_ERRORS - penalty).max(SCORE_FLOOR)), ConfidenceBucket::Low)
        }
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// Deterministic follow-up actions derived from report counters.
pub fn next_steps(report: &TransformationReport, upgradeable_contracts: usize) -> Vec<String> {
    let consistency = &report.consistency;
    let structural_issues = consistency
        .issues
        .len()
        .saturating_sub(consistency.syntax_errors);
    let mut steps = Vec::new();
    if structural_issues > 0 {
        steps.push(format!(
            "Fix {} before deploying",
            plural(structural_issues, "cross-file consistency issue")
        ));
    }
    if consistency.syntax_errors > 0 {
        steps.push(format!(
            "Resolve syntax errors in {}",
            plural(consistency.syntax_errors, "transformed file")
        ));
    }
    if report.files_skipped > 0 {
        steps.push(format!(
            "Review {} manually",
            plural(report.files_skipped, "skipped file")
        ));
    }
    if upgradeable_contracts > 0 {
        steps.push(format!(
            "Verify storage layout compatibility for {}",
            plural(upgradeable_contracts, "upgradeable contract")
        ));
    }
    if report.files_modified == 0 {
        steps.push("No files were modified; revisit the migration plan".to_string());
    }
    steps.push("Run the project's test suite against the transformed contracts".to_string());
    steps
}

/// Score the transformation. Consistency issues are errors; report and
/// per-file warnings are warnings.
pub fn validation_report(
    report: &TransformationReport,
    upgradeable_contracts: usize,
) -> ValidationReport {
    let errors = report.consistency.issues.clone();
    let mut warnings = report.warnings.clone();
    for file in &report.files {
        warnings.extend(file.warnings.iter().map(|w| format!("{}: {w}", file.file_path)));
    }
    let (confidence_score, confidence_bucket) = validation_score(errors.len(), warnings.len());
    ValidationReport {
        passed: errors.is_empty(),
        next_steps: next_steps(report, upgradeable_contracts),
        errors,
        warnings,
        confidence_score,
        confidence_bucket,
    }
}
