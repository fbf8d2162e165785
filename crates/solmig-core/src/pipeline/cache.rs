//! Staged, TTL-bounded artifact cache with single-flight computation.
//!
//! One entry per repository holds at most one artifact per stage. Storing a
//! stage drops everything downstream of it. Concurrent requests for the same
//! cold (repository, stage) pair share one computation through a
//! [`Shared`] future; the mutex guarding the state is never held across an
//! `.await`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{MigrationError, MigrationResult};
use crate::models::{AnalysisResult, IngestResult, MigrationPlan, TransformOutcome};
use crate::pipeline::key::RepoKey;

// ---------------------------------------------------------------------------
// Stages and artifacts
// ---------------------------------------------------------------------------

const STAGE_COUNT: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Tree,
    Analysis,
    Plan,
    Transform,
}

impl Stage {
    pub const ALL: [Stage; STAGE_COUNT] = [Stage::Tree, Stage::Analysis, Stage::Plan, Stage::Transform];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Tree => "tree",
            Stage::Analysis => "analysis",
            Stage::Plan => "plan",
            Stage::Transform => "transform",
        }
    }

    /// Stages strictly after this one.
    pub fn downstream(self) -> &'static [Stage] {
        &Self::ALL[self.index() + 1..]
    }

    /// This stage followed by everything downstream of it.
    pub fn and_downstream(self) -> &'static [Stage] {
        &Self::ALL[self.index()..]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub enum Artifact {
    Tree(Arc<IngestResult>),
    Analysis(Arc<AnalysisResult>),
    Plan(Arc<MigrationPlan>),
    Transform(Arc<TransformOutcome>),
}

impl Artifact {
    pub fn stage(&self) -> Stage {
        match self {
            Artifact::Tree(_) => Stage::Tree,
            Artifact::Analysis(_) => Stage::Analysis,
            Artifact::Plan(_) => Stage::Plan,
            Artifact::Transform(_) => Stage::Transform,
        }
    }

    /// Same stage and the same allocation.
    fn same_as(&self, other: &Artifact) -> bool {
        match (self, other) {
            (Artifact::Tree(a), Artifact::Tree(b)) => Arc::ptr_eq(a, b),
            (Artifact::Analysis(a), Artifact::Analysis(b)) => Arc::ptr_eq(a, b),
            (Artifact::Plan(a), Artifact::Plan(b)) => Arc::ptr_eq(a, b),
            (Artifact::Transform(a), Artifact::Transform(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Upstream artifacts a computation was derived from. A derived result is
/// only stored while every one of them is still the cached artifact of its
/// stage.
#[derive(Clone, Debug, Default)]
pub struct Lineage {
    sources: Vec<Artifact>,
}

impl Lineage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: StageArtifact>(mut self, value: &Arc<T>) -> Self {
        self.sources.push(T::wrap(Arc::clone(value)));
        self
    }
}

/// Maps an artifact type onto the stage slot it occupies.
pub trait StageArtifact: Sized + Send + Sync + 'static {
    const STAGE: Stage;

    fn wrap(value: Arc<Self>) -> Artifact;

    fn unwrap(artifact: &Artifact) -> Option<Arc<Self>>;
}

macro_rules! stage_artifact {
    ($ty:ty, $variant:ident) => {
        impl StageArtifact for $ty {
            const STAGE: Stage = Stage::$variant;

            fn wrap(value: Arc<Self>) -> Artifact {
                Artifact::$variant(value)
            }

            fn unwrap(artifact: &Artifact) -> Option<Arc<Self>> {
                match artifact {
                    Artifact::$variant(value) => Some(Arc::clone(value)),
                    _ => None,
                }
            }
        }
    };
}

stage_artifact!(IngestResult, Tree);
stage_artifact!(AnalysisResult, Analysis);
stage_artifact!(MigrationPlan, Plan);
stage_artifact!(TransformOutcome, Transform);

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

type ComputeFuture = Shared<BoxFuture<'static, MigrationResult<Artifact>>>;

struct StoredArtifact {
    artifact: Artifact,
    stored_at: Instant,
}

#[derive(Default)]
struct RepoEntry {
    slots: [Option<StoredArtifact>; STAGE_COUNT],
}

impl RepoEntry {
    fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

struct InFlight {
    id: u64,
    future: ComputeFuture,
}

#[derive(Default)]
struct CacheState {
    entries: IndexMap<RepoKey, RepoEntry>,
    in_flight: HashMap<(RepoKey, Stage), InFlight>,
    // Kept outside `entries` so eviction does not reset them.
    epochs: HashMap<RepoKey, [u64; STAGE_COUNT]>,
    next_id: u64,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn epoch(&self, key: &RepoKey, stage: Stage) -> u64 {
        self.epochs.get(key).map_or(0, |e| e[stage.index()])
    }

    fn bump_epochs(&mut self, key: &RepoKey, stages: &[Stage]) {
        let epochs = self.epochs.entry(key.clone()).or_default();
        for stage in stages {
            epochs[stage.index()] += 1;
        }
    }

    /// True while every lineage source still occupies its stage slot.
    fn is_current(&self, key: &RepoKey, lineage: &Lineage) -> bool {
        lineage.sources.iter().all(|source| {
            self.entries
                .get(key)
                .and_then(|entry| entry.slots[source.stage().index()].as_ref())
                .is_some_and(|stored| stored.artifact.same_as(source))
        })
    }

    fn touch(&mut self, key: &RepoKey) {
        if let Some(entry) = self.entries.shift_remove(key) {
            self.entries.insert(key.clone(), entry);
        }
    }

    /// The artifact for `stage` if present and younger than `ttl`. An
    /// expired artifact is dropped on the way.
    fn fresh(&mut self, key: &RepoKey, stage: Stage, ttl: Duration) -> Option<Artifact> {
        let entry = self.entries.get_mut(key)?;
        let slot = &mut entry.slots[stage.index()];
        match slot {
            Some(stored) if stored.stored_at.elapsed() < ttl => Some(stored.artifact.clone()),
            Some(_) => {
                debug!(repo = %key, %stage, "cached artifact expired");
                *slot = None;
                if entry.is_empty() {
                    self.entries.shift_remove(key);
                }
                None
            }
            None => None,
        }
    }

    fn remove_stages(&mut self, key: &RepoKey, stages: &[Stage]) -> usize {
        let Some(entry) = self.entries.get_mut(key) else {
            return 0;
        };
        let removed = stages
            .iter()
            .filter(|stage| entry.slots[stage.index()].take().is_some())
            .count();
        if entry.is_empty() {
            self.entries.shift_remove(key);
        }
        removed
    }

    fn store(&mut self, key: &RepoKey, artifact: Artifact, max_repositories: usize) {
        // Downstream computations already in flight are left alone: on a cold
        // chain they are the ones awaiting this store. A derived result built
        // on a replaced artifact is caught by its lineage instead.
        let stage = artifact.stage();
        self.remove_stages(key, stage.downstream());

        let mut entry = self.entries.shift_remove(key).unwrap_or_default();
        entry.slots[stage.index()] = Some(StoredArtifact {
            artifact,
            stored_at: Instant::now(),
        });
        self.entries.insert(key.clone(), entry);

        while self.entries.len() > max_repositories {
            if let Some((evicted, _)) = self.entries.shift_remove_index(0) {
                debug!(repo = %evicted, "evicted least recently used repository");
            }
        }
    }
}

struct CacheInner {
    ttl: Duration,
    max_repositories: usize,
    state: Mutex<CacheState>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct PipelineCache {
    inner: Arc<CacheInner>,
}

impl PipelineCache {
    pub fn new(ttl: Duration, max_repositories: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                ttl,
                max_repositories: max_repositories.max(1),
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Return the cached artifact for `T::STAGE`, or run `compute` once and
    /// share its result with every concurrent caller for the same key.
    ///
    /// `compute` is invoked with the cache lock held and must only build the
    /// future; any cache access belongs inside the returned future. A failed
    /// computation is not stored. A result whose stage was invalidated while
    /// it ran is returned to its waiters but not stored.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &RepoKey, compute: F) -> MigrationResult<Arc<T>>
    where
        T: StageArtifact,
        F: FnOnce() -> Fut,
        Fut: Future<Output = MigrationResult<T>> + Send + 'static,
    {
        self.get_or_compute_derived(key, move || {
            compute().map(|result| result.map(|value| (value, Lineage::new())))
        })
        .await
    }

    /// Like [`get_or_compute`](Self::get_or_compute) for a stage derived from
    /// upstream artifacts. The computation reports the [`Lineage`] it read;
    /// if any of those artifacts was replaced or dropped before it finished,
    /// the result goes to its waiters but is not stored.
    pub async fn get_or_compute_derived<T, F, Fut>(
        &self,
        key: &RepoKey,
        compute: F,
    ) -> MigrationResult<Arc<T>>
    where
        T: StageArtifact,
        F: FnOnce() -> Fut,
        Fut: Future<Output = MigrationResult<(T, Lineage)>> + Send + 'static,
    {
        let stage = T::STAGE;
        let future = {
            let mut state = self.inner.state.lock();
            if let Some(artifact) = state.fresh(key, stage, self.inner.ttl) {
                state.hits += 1;
                state.touch(key);
                drop(state);
                debug!(repo = %key, %stage, "cache hit");
                return downcast(&artifact);
            }
            let slot = (key.clone(), stage);
            let joined = state.in_flight.get(&slot).map(|f| f.future.clone());
            if let Some(future) = joined {
                state.hits += 1;
                debug!(repo = %key, %stage, "joining in-flight computation");
                future
            } else {
                state.misses += 1;
                let epoch = state.epoch(key, stage);
                let id = state.next_id;
                state.next_id += 1;
                debug!(repo = %key, %stage, "cache miss");
                let future = compute_and_store::<T, Fut>(
                    Arc::clone(&self.inner),
                    key.clone(),
                    id,
                    epoch,
                    compute(),
                )
                .boxed()
                .shared();
                state.in_flight.insert(
                    slot,
                    InFlight {
                        id,
                        future: future.clone(),
                    },
                );
                future
            }
        };
        let artifact = future.await?;
        downcast(&artifact)
    }

    /// Read a fresh artifact without computing or touching recency.
    pub fn peek<T: StageArtifact>(&self, key: &RepoKey) -> Option<Arc<T>> {
        let mut state = self.inner.state.lock();
        state
            .fresh(key, T::STAGE, self.inner.ttl)
            .and_then(|artifact| T::unwrap(&artifact))
    }

    pub fn contains(&self, key: &RepoKey, stage: Stage) -> bool {
        let mut state = self.inner.state.lock();
        state.fresh(key, stage, self.inner.ttl).is_some()
    }

    /// Seed an artifact as if it had been computed. Downstream artifacts are
    /// dropped exactly as for a computed store.
    pub fn insert<T: StageArtifact>(&self, key: &RepoKey, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let mut state = self.inner.state.lock();
        state.bump_epochs(key, &[T::STAGE]);
        state.in_flight.remove(&(key.clone(), T::STAGE));
        state.store(key, T::wrap(Arc::clone(&value)), self.inner.max_repositories);
        value
    }

    /// Remove `stage` and everything downstream for `key`. Computations of
    /// those stages already running will not store their results.
    pub fn invalidate(&self, key: &RepoKey, stage: Stage) -> usize {
        let stages = stage.and_downstream();
        let mut state = self.inner.state.lock();
        state.bump_epochs(key, stages);
        for s in stages {
            state.in_flight.remove(&(key.clone(), *s));
        }
        let removed = state.remove_stages(key, stages);
        debug!(repo = %key, %stage, removed, "invalidated stages");
        removed
    }

    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        let keys: Vec<RepoKey> = state.entries.keys().cloned().collect();
        for key in &keys {
            state.bump_epochs(key, &Stage::ALL);
        }
        state.entries.clear();
        state.in_flight.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            entries: state.entries.len(),
            in_flight: state.in_flight.len(),
            hits: state.hits,
            misses: state.misses,
        }
    }
}

impl fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCache")
            .field("ttl", &self.inner.ttl)
            .field("max_repositories", &self.inner.max_repositories)
            .field("stats", &self.stats())
            .finish()
    }
}

fn downcast<T: StageArtifact>(artifact: &Artifact) -> MigrationResult<Arc<T>> {
    T::unwrap(artifact).ok_or_else(|| {
        MigrationError::Internal(format!(
            "cache slot {} holds a {} artifact",
            T::STAGE,
            artifact.stage()
        ))
    })
}

async fn compute_and_store<T, Fut>(
    inner: Arc<CacheInner>,
    key: RepoKey,
    id: u64,
    epoch: u64,
    compute: Fut,
) -> MigrationResult<Artifact>
where
    T: StageArtifact,
    Fut: Future<Output = MigrationResult<(T, Lineage)>> + Send + 'static,
{
    let outcome = compute.await;

    let stage = T::STAGE;
    let mut state = inner.state.lock();
    let slot = (key.clone(), stage);
    if state.in_flight.get(&slot).is_some_and(|f| f.id == id) {
        state.in_flight.remove(&slot);
    }
    let (value, lineage) = match outcome {
        Ok(computed) => computed,
        Err(err) => {
            warn!(repo = %key, %stage, "stage computation failed: {err}");
            return Err(err);
        }
    };
    let artifact = T::wrap(Arc::new(value));
    if state.epoch(&key, stage) != epoch {
        warn!(repo = %key, %stage, "stage invalidated while computing, result not cached");
    } else if !state.is_current(&key, &lineage) {
        warn!(repo = %key, %stage, "upstream artifact replaced while computing, result not cached");
    } else {
        state.store(&key, artifact.clone(), inner.max_repositories);
    }
    Ok(artifact)
}
