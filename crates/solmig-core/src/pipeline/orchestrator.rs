//! Stage orchestration: ingest → analyze → plan → transform.
//!
//! Every stage goes through the shared [`PipelineCache`], so concurrent
//! requests for the same repository collapse into one computation per stage
//! and each stage reuses the cached artifact of the stage before it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::errors::{MigrationError, MigrationResult};
use crate::indexer::pipeline::{analyze_sources, SourceInput};
use crate::models::{
    AnalysisResult, AnalysisSummary, FileOutcome, GeneratorOutput, IngestResult, MigrationPlan,
    Recommendation, RecommendationCategory, RiskLevel, TransformOutcome, TransformRequest,
};
use crate::pipeline::cache::{CacheStats, Lineage, PipelineCache, Stage};
use crate::pipeline::collaborators::{
    fallback_recommendation, parse_recommendations, parse_transform_response, CodeTransformer,
    RecommendationGenerator, RepositoryClient, Untrusted,
};
use crate::pipeline::key::RepoKey;
use crate::report::aggregate::{aggregate_report, file_outcome, skipped_outcome, validation_report};
use crate::report::consistency::{validate_consistency, ConsistencyRules, TransformedSource};

const HIGH_RISK_SECURITY_RECOMMENDATIONS: usize = 3;

/// Drives the staged pipeline for any number of repositories. Cheap to
/// clone; clones share the cache and collaborators.
#[derive(Clone)]
pub struct MigrationPipeline {
    config: Arc<PipelineConfig>,
    cache: PipelineCache,
    repository: Option<Arc<dyn RepositoryClient>>,
    generator: Option<Arc<dyn RecommendationGenerator>>,
    transformer: Option<Arc<dyn CodeTransformer>>,
}

impl MigrationPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let cache = PipelineCache::new(config.cache_ttl(), config.max_repositories);
        Self {
            config: Arc::new(config),
            cache,
            repository: None,
            generator: None,
            transformer: None,
        }
    }

    pub fn with_cache(mut self, cache: PipelineCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_repository_client(mut self, client: Arc<dyn RepositoryClient>) -> Self {
        self.repository = Some(client);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn RecommendationGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn CodeTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &PipelineCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn invalidate(&self, key: &RepoKey, stage: Stage) -> usize {
        self.cache.invalidate(key, stage)
    }

    /// Seed an analysis produced outside the pipeline, e.g. from a local scan.
    pub fn seed_analysis(&self, analysis: AnalysisResult) -> Arc<AnalysisResult> {
        let key = analysis.key.clone();
        self.cache.insert(&key, analysis)
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    pub async fn ingest(&self, key: &RepoKey) -> MigrationResult<Arc<IngestResult>> {
        let Some(client) = self.repository.clone() else {
            return self
                .cache
                .peek::<IngestResult>(key)
                .ok_or_else(|| missing_upstream(key, Stage::Tree, "no repository client configured"));
        };
        let k = key.clone();
        self.cache
            .get_or_compute(key, move || async move { compute_ingest(client, k).await })
            .await
    }

    pub async fn analyze(&self, key: &RepoKey) -> MigrationResult<Arc<AnalysisResult>> {
        self.require_upstream(key, Stage::Analysis)?;
        let this = self.clone();
        let k = key.clone();
        self.cache
            .get_or_compute_derived(key, move || async move { this.compute_analysis(&k).await })
            .await
    }

    pub async fn plan(&self, key: &RepoKey) -> MigrationResult<Arc<MigrationPlan>> {
        self.require_upstream(key, Stage::Plan)?;
        let this = self.clone();
        let k = key.clone();
        self.cache
            .get_or_compute_derived(key, move || async move { this.compute_plan(&k).await })
            .await
    }

    pub async fn transform(&self, key: &RepoKey) -> MigrationResult<Arc<TransformOutcome>> {
        self.require_upstream(key, Stage::Transform)?;
        let this = self.clone();
        let k = key.clone();
        self.cache
            .get_or_compute_derived(key, move || async move { this.compute_transform(&k).await })
            .await
    }

    /// Run every stage for `key`, reusing whatever is cached.
    pub async fn run(&self, key: &RepoKey) -> MigrationResult<Arc<TransformOutcome>> {
        self.transform(key).await
    }

    // -----------------------------------------------------------------------
    // Cache-state checks
    // -----------------------------------------------------------------------

    /// Without a repository client, a stage can only be served when it or
    /// one of its upstream stages is already cached.
    fn require_upstream(&self, key: &RepoKey, stage: Stage) -> MigrationResult<()> {
        if self.repository.is_some() {
            return Ok(());
        }
        let reachable = Stage::ALL
            .iter()
            .filter(|s| **s <= stage)
            .any(|s| self.cache.contains(key, *s));
        if reachable {
            Ok(())
        } else {
            Err(missing_upstream(
                key,
                Stage::Tree,
                "artifact not cached and no repository client configured",
            ))
        }
    }

    // -----------------------------------------------------------------------
    // Compute functions
    // -----------------------------------------------------------------------

    async fn fetch_sources(&self, key: &RepoKey, ingest: &IngestResult) -> Vec<SourceInput> {
        let paths: Vec<String> = ingest
            .tree
            .contract_files()
            .into_iter()
            .map(|f| f.path.clone())
            .collect();
        let concurrency = self.config.fetch_concurrency;
        stream::iter(paths)
            .map(|path| async move {
                if let Some(text) = ingest.sources.as_ref().and_then(|s| s.get(&path)) {
                    return SourceInput::fetched(path, text.clone());
                }
                match &self.repository {
                    Some(client) => match client.fetch_file_content(key, &path).await {
                        Ok(text) => SourceInput::fetched(path, text),
                        Err(err) => SourceInput::failed(path, err.to_string()),
                    },
                    None => SourceInput::failed(path, "no repository client configured"),
                }
            })
            .buffered(concurrency)
            .collect()
            .await
    }

    async fn compute_analysis(&self, key: &RepoKey) -> MigrationResult<(AnalysisResult, Lineage)> {
        let ingest = self.ingest(key).await?;
        let inputs = self.fetch_sources(key, &ingest).await;
        let files_scanned = ingest.tree.total_files();
        let options = self.config.analysis_options();
        let k = key.clone();
        let analysis =
            tokio::task::spawn_blocking(move || analyze_sources(k, files_scanned, inputs, &options))
                .await?;
        Ok((analysis, Lineage::new().with(&ingest)))
    }

    async fn compute_plan(&self, key: &RepoKey) -> MigrationResult<(MigrationPlan, Lineage)> {
        let analysis = self.analyze(key).await?;
        let summary = AnalysisSummary::from_analysis(&analysis);
        let mut warnings = Vec::new();

        let (recommendations, generator_output) = match &self.generator {
            None => {
                warnings.push("no recommendation generator configured".to_string());
                (vec![], GeneratorOutput::Unavailable)
            }
            Some(generator) => match generator.generate(&summary).await {
                Ok(raw) => match parse_recommendations(&raw) {
                    Untrusted::Valid(recs) => (recs, GeneratorOutput::Valid),
                    Untrusted::Malformed { reason, .. } => {
                        warn!(repo = %key, "recommendation generator returned malformed output: {reason}");
                        warnings.push(format!(
                            "recommendation generator returned malformed output: {reason}"
                        ));
                        (vec![fallback_recommendation(&reason)], GeneratorOutput::Malformed)
                    }
                },
                Err(err) => {
                    warn!(repo = %key, "recommendation generator failed: {err}");
                    warnings.push(format!("recommendation generator failed: {err}"));
                    (vec![], GeneratorOutput::Unavailable)
                }
            },
        };

        let mut by_category: BTreeMap<RecommendationCategory, usize> = BTreeMap::new();
        for rec in &recommendations {
            *by_category.entry(rec.category).or_default() += 1;
        }
        let risk_level = assess_risk(&analysis, &recommendations, generator_output);
        info!(
            repo = %key,
            recommendations = recommendations.len(),
            risk = ?risk_level,
            "plan complete"
        );

        let plan = MigrationPlan {
            key: key.clone(),
            summary,
            recommendations,
            by_category,
            risk_level,
            generator_output,
            warnings,
            created_at: Utc::now(),
        };
        Ok((plan, Lineage::new().with(&analysis)))
    }

    async fn compute_transform(&self, key: &RepoKey) -> MigrationResult<(TransformOutcome, Lineage)> {
        // Upstream first: a recomputed analysis drops the plan, which is then
        // rebuilt from it instead of being reused.
        let analysis = self.analyze(key).await?;
        let plan = self.plan(key).await?;
        let ingest = self.cache.peek::<IngestResult>(key);
        let lineage = Lineage::new().with(&analysis).with(&plan);

        let analysed: HashSet<&str> = analysis.source_files.iter().map(String::as_str).collect();
        let mut warnings = plan.warnings.clone();
        let mut groups: BTreeMap<String, Vec<Recommendation>> = BTreeMap::new();
        let mut untargeted = 0usize;
        for rec in &plan.recommendations {
            if rec.file_path.is_empty() {
                untargeted += 1;
            } else if analysed.contains(rec.file_path.as_str()) {
                groups.entry(rec.file_path.clone()).or_default().push(rec.clone());
            } else {
                warnings.push(format!(
                    "recommendation for unknown file {} ignored",
                    rec.file_path
                ));
            }
        }
        if untargeted > 0 {
            warnings.push(format!(
                "{untargeted} recommendation(s) without a target file need manual review"
            ));
        }

        let concurrency = self.config.transform_concurrency;
        let outcomes: Vec<FileOutcome> = stream::iter(groups)
            .map(|(path, recs)| {
                let ingest = ingest.clone();
                async move { self.transform_file(key, ingest.as_deref(), path, recs).await }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let transformed: Vec<(String, String)> = outcomes
            .iter()
            .filter_map(|o| Some((o.file_path.clone(), o.transformed_code.clone()?)))
            .collect();
        let rules = ConsistencyRules::from_config(&self.config);
        let validation_input = Arc::clone(&analysis);
        let consistency = tokio::task::spawn_blocking(move || {
            let sources: Vec<TransformedSource<'_>> = transformed
                .iter()
                .map(|(path, code)| TransformedSource {
                    file_path: path.as_str(),
                    code: code.as_str(),
                })
                .collect();
            validate_consistency(&validation_input, &sources, &rules)
        })
        .await?;

        let transformation = aggregate_report(key.clone(), outcomes, warnings, consistency);
        let validation = validation_report(&transformation, analysis.upgradeable.value.len());
        info!(
            repo = %key,
            files_modified = transformation.files_modified,
            files_skipped = transformation.files_skipped,
            overall_confidence = transformation.overall_confidence,
            passed = validation.passed,
            "transform complete"
        );
        let outcome = TransformOutcome {
            transformation,
            validation,
        };
        Ok((outcome, lineage))
    }

    async fn transform_file(
        &self,
        key: &RepoKey,
        ingest: Option<&IngestResult>,
        path: String,
        recommendations: Vec<Recommendation>,
    ) -> FileOutcome {
        let Some(transformer) = &self.transformer else {
            return skipped_outcome(&path, &recommendations, "no code transformer configured", vec![]);
        };

        let cached = ingest.and_then(|i| i.sources.as_ref()).and_then(|s| s.get(&path));
        let source = match (cached, &self.repository) {
            (Some(text), _) => text.clone(),
            (None, Some(client)) => match client.fetch_file_content(key, &path).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(repo = %key, file = %path, "source fetch failed: {err}");
                    return skipped_outcome(
                        &path,
                        &recommendations,
                        format!("source fetch failed: {err}"),
                        vec![],
                    );
                }
            },
            (None, None) => {
                return skipped_outcome(&path, &recommendations, "source unavailable", vec![]);
            }
        };

        let request = TransformRequest {
            key: key.clone(),
            file_path: path.clone(),
            source,
            recommendations,
        };
        match transformer.transform(&request).await {
            Ok(raw) => match parse_transform_response(&raw) {
                Untrusted::Valid(response) => file_outcome(&path, &request.recommendations, &response),
                Untrusted::Malformed { reason, .. } => {
                    warn!(repo = %key, file = %path, "transformer returned malformed output: {reason}");
                    skipped_outcome(
                        &path,
                        &request.recommendations,
                        format!("malformed transformer output: {reason}"),
                        vec![],
                    )
                }
            },
            Err(err) => {
                warn!(repo = %key, file = %path, "transformer failed: {err}");
                skipped_outcome(
                    &path,
                    &request.recommendations,
                    format!("transformer failed: {err}"),
                    vec![],
                )
            }
        }
    }
}

fn missing_upstream(key: &RepoKey, stage: Stage, reason: &str) -> MigrationError {
    MigrationError::MissingUpstream {
        key: key.to_string(),
        stage: stage.to_string(),
        reason: reason.to_string(),
    }
}

async fn compute_ingest(client: Arc<dyn RepositoryClient>, key: RepoKey) -> MigrationResult<IngestResult> {
    let (metadata, tree) = tokio::try_join!(client.fetch_metadata(&key), client.fetch_tree(&key))?;
    let sources = client.prefetched_sources(&key, &tree).await?;
    info!(
        repo = %key,
        files = tree.total_files(),
        contract_files = tree.contract_files().len(),
        "ingest complete"
    );
    Ok(IngestResult {
        key,
        metadata,
        tree,
        sources,
        fetched_at: Utc::now(),
    })
}

/// Coarse risk from upgradeability, security findings and output quality.
pub fn assess_risk(
    analysis: &AnalysisResult,
    recommendations: &[Recommendation],
    generator_output: GeneratorOutput,
) -> RiskLevel {
    let security = recommendations
        .iter()
        .filter(|r| r.category == RecommendationCategory::Security)
        .count();
    if !analysis.upgradeable.value.is_empty() || security >= HIGH_RISK_SECURITY_RECOMMENDATIONS {
        RiskLevel::High
    } else if security > 0
        || !analysis.parse_errors.is_empty()
        || generator_output != GeneratorOutput::Valid
    {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::indexer::pipeline::AnalysisOptions;
    use crate::models::{
        ConfidenceLevel, RepositoryMetadata, RepositoryTree, RepositoryVisibility, TransformAction,
    };

    struct MockRepository {
        files: HashMap<String, String>,
        tree_calls: AtomicUsize,
        content_calls: AtomicUsize,
    }

    impl MockRepository {
        fn new(files: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                files: files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.to_string()))
                    .collect(),
                tree_calls: AtomicUsize::new(0),
                content_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl RepositoryClient for MockRepository {
        async fn fetch_metadata(&self, key: &RepoKey) -> MigrationResult<RepositoryMetadata> {
            Ok(RepositoryMetadata {
                owner: key.owner.clone(),
                name: key.name.clone(),
                url: key.url(),
                default_branch: "main".into(),
                visibility: RepositoryVisibility::Public,
                size_kb: 4,
            })
        }

        async fn fetch_tree(&self, _key: &RepoKey) -> MigrationResult<RepositoryTree> {
            self.tree_calls.fetch_add(1, Ordering::SeqCst);
            Ok(RepositoryTree::from_paths(
                self.files.iter().map(|(p, c)| (p.clone(), c.len() as u64)),
            ))
        }

        async fn fetch_file_content(&self, _key: &RepoKey, path: &str) -> MigrationResult<String> {
            self.content_calls.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| MigrationError::collaborator("repository", format!("{path} not found")))
        }
    }

    struct ScriptedGenerator {
        response: MigrationResult<String>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(response: MigrationResult<String>) -> Arc<Self> {
            Self::slow(response, Duration::from_millis(5))
        }

        fn slow(response: MigrationResult<String>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                response,
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl RecommendationGenerator for ScriptedGenerator {
        async fn generate(&self, _summary: &AnalysisSummary) -> MigrationResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.response.clone()
        }
    }

    struct ScriptedTransformer {
        responses: HashMap<String, MigrationResult<String>>,
    }

    #[async_trait::async_trait]
    impl CodeTransformer for ScriptedTransformer {
        async fn transform(&self, request: &TransformRequest) -> MigrationResult<String> {
            self.responses
                .get(&request.file_path)
                .cloned()
                .unwrap_or_else(|| Ok(r#"{"action":"skip","warnings":["nothing to do"]}"#.into()))
        }
    }

    const TOKEN: &str = "pragma solidity ^0.8.20;\ncontract Token {\n  function mint(address to) external {}\n}\n";
    const SALE: &str = "pragma solidity ^0.8.20;\nimport \"./Token.sol\";\ncontract Sale is Token {}\n";

    fn key() -> RepoKey {
        RepoKey::parse("acme/vaults").unwrap()
    }

    fn repository() -> Arc<MockRepository> {
        MockRepository::new(&[
            ("src/Token.sol", TOKEN),
            ("src/Sale.sol", SALE),
            ("test/Sale.t.sol", "contract SaleTest {}"),
            ("README.md", "# vaults"),
        ])
    }

    fn recommendations_json() -> String {
        r#"{"recommendations":[
            {"file_path":"src/Sale.sol","contract_name":"Sale","category":"security","description":"add reentrancy guard","confidence_level":"high"},
            {"file_path":"src/Sale.sol","category":"gas","description":"cache storage reads","confidence_level":"medium"},
            {"file_path":"src/Token.sol","category":"compatibility","description":"bump pragma","confidence_level":"low"},
            {"file_path":"src/Ghost.sol","category":"testing","description":"add tests","confidence_level":"low"}
        ]}"#
        .to_string()
    }

    fn pipeline(generator: Arc<ScriptedGenerator>) -> (MigrationPipeline, Arc<MockRepository>) {
        let repo = repository();
        let pipeline = MigrationPipeline::new(PipelineConfig::default())
            .with_repository_client(repo.clone())
            .with_generator(generator);
        (pipeline, repo)
    }

    #[tokio::test]
    async fn test_analyze_through_repository_client() {
        let (pipeline, repo) = pipeline(ScriptedGenerator::new(Ok("[]".into())));
        let analysis = pipeline.analyze(&key()).await.unwrap();

        assert_eq!(analysis.contracts.len(), 2);
        assert_eq!(analysis.entry_points.value, vec!["Sale"]);
        assert_eq!(analysis.stats.files_scanned, 4);
        assert_eq!(analysis.stats.files_skipped, 2);
        assert_eq!(repo.content_calls.load(Ordering::SeqCst), 2);

        let again = pipeline.analyze(&key()).await.unwrap();
        assert!(Arc::ptr_eq(&analysis, &again));
        assert_eq!(repo.tree_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_plan_with_non_json_generator_output_degrades() {
        let generator = ScriptedGenerator::new(Ok("Sure! Consider upgrading everything.".into()));
        let (pipeline, _) = pipeline(generator);
        let plan = pipeline.plan(&key()).await.unwrap();

        assert_eq!(plan.recommendations.len(), 1);
        let rec = &plan.recommendations[0];
        assert_eq!(rec.category, RecommendationCategory::Architecture);
        assert_eq!(rec.confidence_level, ConfidenceLevel::Low);
        assert!(rec.rationale.contains("parsing requires verification"));
        assert_eq!(plan.generator_output, GeneratorOutput::Malformed);
        assert_eq!(plan.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_plan_with_failing_generator_is_empty_with_warning() {
        let generator = ScriptedGenerator::new(Err(MigrationError::collaborator(
            "generator",
            "timed out",
        )));
        let (pipeline, _) = pipeline(generator);
        let plan = pipeline.plan(&key()).await.unwrap();

        assert!(plan.recommendations.is_empty());
        assert_eq!(plan.generator_output, GeneratorOutput::Unavailable);
        assert!(plan.warnings[0].contains("timed out"));
        assert_eq!(plan.risk_level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn test_concurrent_plan_requests_call_generator_once() {
        let generator = ScriptedGenerator::new(Ok(recommendations_json()));
        let (pipeline, repo) = pipeline(generator.clone());
        let k = key();

        let plans = futures::future::join_all((0..8).map(|_| pipeline.plan(&k))).await;
        assert!(plans.iter().all(|p| p.is_ok()));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(repo.tree_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_analysis_recomputes_plan_but_keeps_tree() {
        let generator = ScriptedGenerator::new(Ok(recommendations_json()));
        let (pipeline, repo) = pipeline(generator.clone());
        let k = key();

        pipeline.plan(&k).await.unwrap();
        pipeline.invalidate(&k, Stage::Analysis);
        assert!(pipeline.cache().contains(&k, Stage::Tree));
        assert!(!pipeline.cache().contains(&k, Stage::Plan));

        pipeline.plan(&k).await.unwrap();
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(repo.tree_calls.load(Ordering::SeqCst), 1);
    }

    fn short_lived_pipeline(
        generator: Arc<ScriptedGenerator>,
    ) -> (MigrationPipeline, Arc<MockRepository>) {
        let (pipeline, repo) = pipeline(generator);
        let pipeline = pipeline.with_cache(PipelineCache::new(Duration::from_secs(60), 8));
        (pipeline, repo)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transform_rebuilds_plan_when_analysis_expires_first() {
        let generator = ScriptedGenerator::new(Ok(recommendations_json()));
        let (pipeline, repo) = short_lived_pipeline(generator.clone());
        let k = key();

        pipeline.analyze(&k).await.unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;
        let stale_plan = pipeline.plan(&k).await.unwrap();

        // Analysis and tree are past their TTL, the plan is not.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(pipeline.cache().contains(&k, Stage::Plan));

        let outcome = pipeline.transform(&k).await.unwrap();
        for stage in Stage::ALL {
            assert!(pipeline.cache().contains(&k, stage), "{stage}");
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(repo.tree_calls.load(Ordering::SeqCst), 2);

        let plan = pipeline.cache().peek::<MigrationPlan>(&k).unwrap();
        assert!(!Arc::ptr_eq(&plan, &stale_plan));
        let again = pipeline.transform(&k).await.unwrap();
        assert!(Arc::ptr_eq(&outcome, &again));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_on_expired_analysis_refreshed_mid_flight_is_not_cached() {
        let generator =
            ScriptedGenerator::slow(Ok(recommendations_json()), Duration::from_secs(30));
        let (pipeline, _) = short_lived_pipeline(generator.clone());
        let k = key();

        let first = pipeline.analyze(&k).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        let planning = tokio::spawn({
            let pipeline = pipeline.clone();
            let k = k.clone();
            async move { pipeline.plan(&k).await }
        });

        // The plan has read `first` and is waiting on the generator when the
        // analysis expires and is recomputed.
        tokio::time::sleep(Duration::from_secs(15)).await;
        let refreshed = pipeline.analyze(&k).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));

        let plan = planning.await.unwrap().unwrap();
        assert_eq!(plan.recommendations.len(), 4);
        assert!(!pipeline.cache().contains(&k, Stage::Plan));
        assert!(pipeline.cache().contains(&k, Stage::Analysis));

        pipeline.plan(&k).await.unwrap();
        assert!(pipeline.cache().contains(&k, Stage::Plan));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_upstream_without_client_fails_fast() {
        let pipeline = MigrationPipeline::new(PipelineConfig::default());
        let err = pipeline.plan(&key()).await.unwrap_err();
        assert!(matches!(err, MigrationError::MissingUpstream { .. }));
        assert_eq!(pipeline.cache_stats().entries, 0);
        assert_eq!(pipeline.cache_stats().misses, 0);
    }

    #[tokio::test]
    async fn test_seeded_analysis_plans_without_client() {
        let pipeline = MigrationPipeline::new(PipelineConfig::default())
            .with_generator(ScriptedGenerator::new(Ok("[]".into())));
        let analysis = analyze_sources(
            key(),
            1,
            vec![SourceInput::fetched("src/Token.sol", TOKEN)],
            &AnalysisOptions::default(),
        );
        pipeline.seed_analysis(analysis);

        let plan = pipeline.plan(&key()).await.unwrap();
        assert_eq!(plan.generator_output, GeneratorOutput::Valid);
        assert_eq!(plan.risk_level, RiskLevel::Low);
        assert_eq!(plan.summary.contracts.len(), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_transform() {
        let generator = ScriptedGenerator::new(Ok(recommendations_json()));
        let repo = repository();
        let sale_code = "pragma solidity ^0.8.20;\nimport \"./Token.sol\";\nimport \"./Missing.sol\";\ncontract Sale is Token {}\n";
        let sale_response = serde_json::json!({
            "action": "apply",
            "applied_changes": [
                {"description": "added guard", "recommendation": 0},
                {"description": "cached reads", "recommendation": 1}
            ],
            "transformed_code": sale_code,
        })
        .to_string();
        let transformer = Arc::new(ScriptedTransformer {
            responses: HashMap::from([
                ("src/Sale.sol".to_string(), Ok(format!("```json\n{sale_response}\n```"))),
                ("src/Token.sol".to_string(), Ok("no idea".to_string())),
            ]),
        });
        let pipeline = MigrationPipeline::new(PipelineConfig::default())
            .with_repository_client(repo.clone())
            .with_generator(generator)
            .with_transformer(transformer);

        let outcome = pipeline.run(&key()).await.unwrap();
        let report = &outcome.transformation;

        let paths: Vec<&str> = report.files.iter().map(|f| f.file_path.as_str()).collect();
        assert_eq!(paths, vec!["src/Sale.sol", "src/Token.sol"]);
        assert_eq!(report.files[0].action, TransformAction::Apply);
        assert_eq!(report.files[1].action, TransformAction::Skip);
        assert!(report.files[1]
            .skip_reason
            .as_deref()
            .unwrap()
            .starts_with("malformed transformer output"));
        assert_eq!(report.files_modified, 1);
        assert_eq!(report.files_skipped, 1);
        // mean(0.9, 0.7) over a fully applied file
        assert_eq!(report.overall_confidence, 0.8);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("src/Ghost.sol")));

        assert!(report.consistency.checked);
        assert!(!report.consistency.imports_valid);
        assert!(report.consistency.inheritance_valid);
        assert_eq!(report.consistency.issues.len(), 1);
        assert!(report.consistency.issues[0].contains("./Missing.sol"));

        let validation = &outcome.validation;
        assert!(!validation.passed);
        assert_eq!(validation.confidence_score, 0.5);
        assert_eq!(
            validation.next_steps.last().map(String::as_str),
            Some("Run the project's test suite against the transformed contracts")
        );

        // Every stage is now cached.
        for stage in Stage::ALL {
            assert!(pipeline.cache().contains(&key(), stage), "{stage}");
        }
        let again = pipeline.run(&key()).await.unwrap();
        assert!(Arc::ptr_eq(&outcome, &again));
    }

    #[test]
    fn test_assess_risk() {
        let mut analysis = analyze_sources(key(), 0, vec![], &AnalysisOptions::default());
        assert_eq!(assess_risk(&analysis, &[], GeneratorOutput::Valid), RiskLevel::Low);
        assert_eq!(
            assess_risk(&analysis, &[], GeneratorOutput::Malformed),
            RiskLevel::Medium
        );
        analysis.upgradeable.value.push("Vault".into());
        assert_eq!(assess_risk(&analysis, &[], GeneratorOutput::Valid), RiskLevel::High);
    }
}
