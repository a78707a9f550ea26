//! Orchestration: build/rebuild, writes, and query routing.
//!
//! The manager owns the single `ClusterIndex` behind an atomic pointer
//! swap. Queries load whichever index is current and never block each
//! other; writers serialize on the record store; rebuilds cluster against
//! a snapshot off the write path and only the final pointer swap is
//! exclusive.
//!
//! # States
//! `Empty` (no records), `Unbuilt` (records, no index, brute force),
//! `Fresh` (index built, drift within threshold), `Stale` (drift past
//! threshold). Queries over a stale or drifted index union the probed
//! clusters with a brute-force scan of post-build records, so recall is
//! never silently degraded, only latency.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::clustering::lloyd_clustering;
use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult};
use crate::index::ClusterIndex;
use crate::persist;
use crate::similarity::{rank_top_k, score_candidates};
use crate::store::{RecordStore, VectorRecord};
use crate::types::{ChunkMetadata, IndexState, SearchResult, VectorDimension, VectorId};

/// Candidates scored between cancellation checks.
const CANDIDATE_BATCH: usize = 1024;

/// Per-query knobs. `Default` gives an approximate search with the
/// configured probe count and no cancellation.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Overrides the configured `nprobe` for this query.
    pub nprobe: Option<usize>,

    /// Brute force over all active records, bypassing the cluster index.
    pub exact: bool,

    /// Caller-supplied cancellation signal, checked between candidate
    /// batches. A cancelled query returns `Cancelled`, never a partial
    /// ranking.
    pub cancel: Option<CancellationToken>,
}

impl SearchOptions {
    /// Exact brute-force search.
    #[must_use]
    pub fn exact() -> Self {
        Self {
            exact: true,
            ..Self::default()
        }
    }

    /// Sets a per-query probe count.
    #[must_use]
    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = Some(nprobe);
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Outcome of one index build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Cluster count actually used, after degenerate-input reduction.
    pub nlist_used: usize,

    /// Lloyd rounds executed.
    pub iterations_run: usize,

    /// Wall time of the build, snapshot to swap.
    pub duration: Duration,
}

/// Point-in-time observability snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub count_active: usize,
    pub count_deleted: usize,
    pub state: IndexState,
    pub current_version: u64,
    pub built_at_version: Option<u64>,
}

/// The embedded vector index: record store, cluster index, and the
/// policies that tie them together.
pub struct IndexManager {
    config: IndexConfig,
    dim: VectorDimension,
    store: RecordStore,

    /// The single shared index, swapped atomically on rebuild.
    index: ArcSwapOption<ClusterIndex>,

    /// Bumped on every insert and delete.
    current_version: AtomicU64,

    /// Ids inserted since the last build; unioned into approximate
    /// queries so post-build records are always searchable.
    drift: RwLock<HashSet<VectorId>>,

    /// Serializes rebuilds; queries and writes are not held across it.
    rebuild_lock: Mutex<()>,
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("config", &self.config)
            .field("count_active", &self.store.len_active())
            .field("current_version", &self.current_version.load(Ordering::Acquire))
            .field("state", &self.state())
            .finish()
    }
}

impl IndexManager {
    /// Creates a manager from validated configuration.
    ///
    /// With `data_dir` set, replays the record log and adopts the
    /// persisted index snapshot when it is still consistent with the log;
    /// otherwise starts in-memory.
    pub fn new(config: IndexConfig) -> IndexResult<Self> {
        config.validate()?;
        let dim = VectorDimension::new(config.dim)?;

        let (store, replayed_ops) = match &config.data_dir {
            Some(dir) => RecordStore::open(dim, dir)?,
            None => (RecordStore::new(dim), 0),
        };

        let manager = Self {
            dim,
            store,
            index: ArcSwapOption::empty(),
            current_version: AtomicU64::new(replayed_ops),
            drift: RwLock::new(HashSet::new()),
            rebuild_lock: Mutex::new(()),
            config,
        };

        if let Some(dir) = &manager.config.data_dir {
            manager.adopt_snapshot(dir, replayed_ops)?;
        }

        Ok(manager)
    }

    /// Installs a persisted snapshot if it is consistent with the
    /// replayed log, discarding it (with a warning) when it is not.
    fn adopt_snapshot(&self, dir: &std::path::Path, replayed_ops: u64) -> IndexResult<()> {
        let Some(snapshot) = persist::load_snapshot(dir)? else {
            return Ok(());
        };

        if snapshot.built_at_version() > replayed_ops {
            tracing::warn!(
                built_at = snapshot.built_at_version(),
                log_ops = replayed_ops,
                "index snapshot is ahead of the record log, discarding"
            );
            return Ok(());
        }
        if snapshot.distance() != self.config.distance {
            tracing::warn!(
                snapshot_metric = ?snapshot.distance(),
                configured = ?self.config.distance,
                "index snapshot was built with a different metric, discarding"
            );
            return Ok(());
        }

        // Records the snapshot never saw become drift
        let mut drift = self.drift.write();
        for record in self.store.all_active() {
            if !snapshot.contains(record.id) {
                drift.insert(record.id);
            }
        }
        drop(drift);

        self.index.store(Some(Arc::new(snapshot)));
        Ok(())
    }

    /// Inserts an embedding, returning its id.
    ///
    /// Bumps the version and, when the write crosses the drift threshold
    /// with `auto_rebuild` enabled, rebuilds before returning.
    pub fn insert(&self, vector: Vec<f32>, metadata: ChunkMetadata) -> IndexResult<VectorId> {
        let id = self.store.insert(vector, metadata)?;
        self.current_version.fetch_add(1, Ordering::AcqRel);
        self.drift.write().insert(id);
        self.maybe_auto_rebuild()?;
        Ok(id)
    }

    /// Tombstones a record. The id never appears in results again, even
    /// before the next rebuild.
    pub fn delete(&self, id: VectorId) -> IndexResult<()> {
        self.store.delete(id)?;
        self.current_version.fetch_add(1, Ordering::AcqRel);
        self.drift.write().remove(&id);
        self.maybe_auto_rebuild()?;
        Ok(())
    }

    /// Fetches a live record by id.
    pub fn get(&self, id: VectorId) -> IndexResult<Arc<VectorRecord>> {
        self.store.get(id)
    }

    /// Top-`k` most similar records to `query`, similarity descending,
    /// ties broken by lower id.
    ///
    /// An empty store yields an empty result, never an error. Exact mode
    /// and the `Unbuilt` state brute-force over all active records;
    /// otherwise the probed clusters are unioned with post-build drift.
    /// An `nprobe` override of zero is rejected, matching configuration
    /// validation.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        options: &SearchOptions,
    ) -> IndexResult<Vec<SearchResult>> {
        self.dim.validate_vector(query)?;
        if options.nprobe == Some(0) {
            return Err(IndexError::InvalidConfig(
                "nprobe must be greater than zero".to_string(),
            ));
        }

        let snapshot = self.store.all_active();
        if snapshot.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let index = if options.exact {
            None
        } else {
            self.index.load_full()
        };

        let candidates: Vec<Arc<VectorRecord>> = match index {
            None => snapshot,
            Some(index) => {
                let nprobe = options.nprobe.unwrap_or(self.config.nprobe);
                let probed = index.probe(query, nprobe);

                let mut wanted: HashSet<VectorId> = probed
                    .iter()
                    .flat_map(|&c| index.clusters()[c].member_ids.iter().copied())
                    .collect();
                wanted.extend(self.drift.read().iter().copied());

                snapshot
                    .into_iter()
                    .filter(|r| wanted.contains(&r.id))
                    .collect()
            }
        };

        let scored = self.score_in_batches(query, &candidates, options.cancel.as_ref())?;
        let top = rank_top_k(scored, k);

        let by_id: std::collections::HashMap<VectorId, &Arc<VectorRecord>> =
            candidates.iter().map(|r| (r.id, r)).collect();

        Ok(top
            .into_iter()
            .map(|(id, score)| SearchResult {
                id,
                score,
                metadata: by_id[&id].metadata.clone(),
            })
            .collect())
    }

    /// Scores candidates in bounded batches, honoring cancellation
    /// between batches.
    fn score_in_batches(
        &self,
        query: &[f32],
        candidates: &[Arc<VectorRecord>],
        cancel: Option<&CancellationToken>,
    ) -> IndexResult<Vec<(VectorId, f32)>> {
        let mut scored = Vec::with_capacity(candidates.len());
        for batch in candidates.chunks(CANDIDATE_BATCH) {
            if let Some(token) = cancel
                && token.is_cancelled()
            {
                return Err(IndexError::Cancelled);
            }
            let refs: Vec<(VectorId, &[f32])> =
                batch.iter().map(|r| (r.id, r.vector.as_slice())).collect();
            scored.extend(score_candidates(query, &refs));
        }
        Ok(scored)
    }

    /// Rebuilds the cluster index from a snapshot of all active records
    /// and swaps it in atomically. In-flight queries see the old or the
    /// new index, never a partial one.
    pub fn rebuild(&self) -> IndexResult<BuildReport> {
        let _guard = self.rebuild_lock.lock();
        let start = Instant::now();

        let snapshot = self.store.all_active();
        if snapshot.is_empty() {
            return Err(IndexError::EmptyInput);
        }
        let version_at_snapshot = self.current_version.load(Ordering::Acquire);

        let vectors: Vec<&[f32]> = snapshot.iter().map(|r| r.vector.as_slice()).collect();
        let ids: Vec<VectorId> = snapshot.iter().map(|r| r.id).collect();

        let clustering = lloyd_clustering(
            &vectors,
            self.config.nlist,
            self.config.distance,
            self.config.max_iterations,
            self.config.seed,
        )?;

        let built = ClusterIndex::from_clustering(
            &clustering,
            &ids,
            version_at_snapshot,
            self.config.distance,
        );

        if let Some(dir) = &self.config.data_dir {
            persist::save_snapshot(dir, &built)?;
        }

        self.index.store(Some(Arc::new(built)));

        // Writes that landed after the snapshot stay drift until the
        // next rebuild absorbs them
        let snapshot_ids: HashSet<VectorId> = ids.iter().copied().collect();
        self.drift.write().retain(|id| !snapshot_ids.contains(id));

        let report = BuildReport {
            nlist_used: clustering.nlist_used,
            iterations_run: clustering.iterations,
            duration: start.elapsed(),
        };
        tracing::info!(
            nlist_used = report.nlist_used,
            iterations = report.iterations_run,
            records = ids.len(),
            elapsed_ms = report.duration.as_millis() as u64,
            "index rebuilt"
        );
        Ok(report)
    }

    /// Rebuilds when the drift threshold has been crossed, or drops the
    /// index when nothing is left to index.
    fn maybe_auto_rebuild(&self) -> IndexResult<()> {
        if !self.config.auto_rebuild || self.state() != IndexState::Stale {
            return Ok(());
        }
        if self.store.len_active() == 0 {
            self.index.store(None);
            self.drift.write().clear();
            return Ok(());
        }
        self.rebuild()?;
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> IndexState {
        match self.index.load_full() {
            None => {
                if self.store.len_total() == 0 {
                    IndexState::Empty
                } else {
                    IndexState::Unbuilt
                }
            }
            Some(index) => {
                let version = self.current_version.load(Ordering::Acquire);
                let drift = version.saturating_sub(index.built_at_version());
                if drift > self.config.drift_threshold {
                    IndexState::Stale
                } else {
                    IndexState::Fresh
                }
            }
        }
    }

    /// Observability counters.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            count_active: self.store.len_active(),
            count_deleted: self.store.len_deleted(),
            state: self.state(),
            current_version: self.current_version.load(Ordering::Acquire),
            built_at_version: self.index.load_full().map(|i| i.built_at_version()),
        }
    }

    /// Physically removes tombstoned records (and rewrites the log when
    /// durable). Ids and the built index stay valid.
    pub fn compact(&self) -> IndexResult<()> {
        self.store.compact()
    }

    /// The currently installed cluster index, if one has been built.
    #[must_use]
    pub fn current_index(&self) -> Option<Arc<ClusterIndex>> {
        self.index.load_full()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }
}
