//! The record store: append-only table of (id, vector, metadata) triples.
//!
//! Records are never mutated in place. A delete flips the tombstone bit
//! and a changed embedding is a delete plus an insert, so readers
//! iterating a snapshot during concurrent appends never observe a torn
//! record. Writers (insert, delete, compact) serialize on the write lock;
//! readers share it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{IndexError, IndexResult};
use crate::persist::{LogEntry, RecordLog};
use crate::types::{ChunkMetadata, VectorDimension, VectorId};

/// One stored embedding with its chunk metadata.
#[derive(Debug)]
pub struct VectorRecord {
    pub id: VectorId,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
    deleted: AtomicBool,
}

impl VectorRecord {
    fn new(id: VectorId, vector: Vec<f32>, metadata: ChunkMetadata) -> Self {
        Self {
            id,
            vector,
            metadata,
            deleted: AtomicBool::new(false),
        }
    }

    /// True once the record has been tombstoned.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }
}

#[derive(Debug)]
struct StoreInner {
    records: Vec<Arc<VectorRecord>>,
    index_of: HashMap<VectorId, usize>,
    next_id: u64,
    deleted: usize,
    log: Option<RecordLog>,
}

/// Thread-safe record table with optional write-through logging.
#[derive(Debug)]
pub struct RecordStore {
    dim: VectorDimension,
    inner: RwLock<StoreInner>,
}

impl RecordStore {
    /// Creates an in-memory store with no durability.
    #[must_use]
    pub fn new(dim: VectorDimension) -> Self {
        Self {
            dim,
            inner: RwLock::new(StoreInner {
                records: Vec::new(),
                index_of: HashMap::new(),
                next_id: 0,
                deleted: 0,
                log: None,
            }),
        }
    }

    /// Opens a durable store backed by an append-only log in `dir`,
    /// replaying any existing records.
    ///
    /// Returns the store together with the number of replayed operations,
    /// which the manager uses as its starting version.
    pub fn open(dim: VectorDimension, dir: impl AsRef<Path>) -> IndexResult<(Self, u64)> {
        let (log, replay) = RecordLog::open_or_create(&dir, dim)?;
        let ops = replay.entries.len() as u64;

        let mut records: Vec<Arc<VectorRecord>> = Vec::new();
        let mut index_of: HashMap<VectorId, usize> = HashMap::new();
        // The header high-water mark covers ids compacted out of the log
        let mut next_id = replay.next_id;
        let mut deleted = 0usize;

        for entry in replay.entries {
            match entry {
                LogEntry::Insert {
                    id,
                    vector,
                    metadata,
                } => {
                    if index_of.contains_key(&id) {
                        return Err(IndexError::CorruptPersistedState(format!(
                            "duplicate insert for id {id} in record log"
                        )));
                    }
                    index_of.insert(id, records.len());
                    records.push(Arc::new(VectorRecord::new(id, vector, metadata)));
                    next_id = next_id.max(id.get() + 1);
                }
                LogEntry::Delete { id } => {
                    let &pos = index_of.get(&id).ok_or_else(|| {
                        IndexError::CorruptPersistedState(format!(
                            "tombstone for unknown id {id} in record log"
                        ))
                    })?;
                    if records[pos].is_deleted() {
                        return Err(IndexError::CorruptPersistedState(format!(
                            "double tombstone for id {id} in record log"
                        )));
                    }
                    records[pos].mark_deleted();
                    deleted += 1;
                }
            }
        }

        Ok((
            Self {
                dim,
                inner: RwLock::new(StoreInner {
                    records,
                    index_of,
                    next_id,
                    deleted,
                    log: Some(log),
                }),
            },
            ops,
        ))
    }

    /// Appends a record, returning its freshly allocated id.
    pub fn insert(&self, vector: Vec<f32>, metadata: ChunkMetadata) -> IndexResult<VectorId> {
        self.dim.validate_vector(&vector)?;

        let mut inner = self.inner.write();
        let id = VectorId::new(inner.next_id);

        if let Some(log) = inner.log.as_mut() {
            log.append_insert(id, &vector, &metadata)?;
        }

        inner.next_id += 1;
        let pos = inner.records.len();
        inner.index_of.insert(id, pos);
        inner
            .records
            .push(Arc::new(VectorRecord::new(id, vector, metadata)));
        Ok(id)
    }

    /// Tombstones a record.
    ///
    /// Deleting an absent or already-deleted id is `NotFound`, not a
    /// no-op, to surface caller bugs.
    pub fn delete(&self, id: VectorId) -> IndexResult<()> {
        let mut inner = self.inner.write();
        let pos = *inner.index_of.get(&id).ok_or(IndexError::NotFound(id))?;
        if inner.records[pos].is_deleted() {
            return Err(IndexError::NotFound(id));
        }

        if let Some(log) = inner.log.as_mut() {
            log.append_delete(id)?;
        }

        inner.records[pos].mark_deleted();
        inner.deleted += 1;
        Ok(())
    }

    /// Fetches a live record.
    pub fn get(&self, id: VectorId) -> IndexResult<Arc<VectorRecord>> {
        let inner = self.inner.read();
        let pos = *inner.index_of.get(&id).ok_or(IndexError::NotFound(id))?;
        let record = &inner.records[pos];
        if record.is_deleted() {
            return Err(IndexError::NotFound(id));
        }
        Ok(Arc::clone(record))
    }

    /// Consistent snapshot of all non-deleted records, insertion order.
    ///
    /// Tombstones are evaluated at snapshot time; appends after the
    /// snapshot are not visible to it.
    #[must_use]
    pub fn all_active(&self) -> Vec<Arc<VectorRecord>> {
        let inner = self.inner.read();
        inner
            .records
            .iter()
            .filter(|r| !r.is_deleted())
            .map(Arc::clone)
            .collect()
    }

    /// Number of live records.
    #[must_use]
    pub fn len_active(&self) -> usize {
        let inner = self.inner.read();
        inner.records.len() - inner.deleted
    }

    /// Number of tombstoned records not yet compacted away.
    #[must_use]
    pub fn len_deleted(&self) -> usize {
        self.inner.read().deleted
    }

    /// Total records ever inserted and still in the table.
    #[must_use]
    pub fn len_total(&self) -> usize {
        self.inner.read().records.len()
    }

    /// The fixed vector dimension of this store.
    #[must_use]
    pub fn dim(&self) -> VectorDimension {
        self.dim
    }

    /// Physically drops tombstoned records from the table and, when
    /// durable, rewrites the log without them. Ids are preserved.
    pub fn compact(&self) -> IndexResult<()> {
        let mut inner = self.inner.write();

        let live: Vec<Arc<VectorRecord>> = inner
            .records
            .iter()
            .filter(|r| !r.is_deleted())
            .map(Arc::clone)
            .collect();

        let next_id = inner.next_id;
        if let Some(log) = inner.log.as_mut() {
            log.compact(
                live.iter()
                    .map(|r| (r.id, r.vector.as_slice(), &r.metadata)),
                next_id,
            )?;
        }

        inner.index_of = live
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.id, pos))
            .collect();
        inner.records = live;
        inner.deleted = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(i: u32) -> ChunkMetadata {
        ChunkMetadata {
            source_path: format!("src/file_{i}.rs"),
            chunk_index: i,
            content_hash: format!("hash-{i}"),
        }
    }

    fn store(dim: usize) -> RecordStore {
        RecordStore::new(VectorDimension::new(dim).unwrap())
    }

    #[test]
    fn test_insert_assigns_monotonic_ids() {
        let s = store(2);
        let a = s.insert(vec![1.0, 0.0], meta(0)).unwrap();
        let b = s.insert(vec![0.0, 1.0], meta(1)).unwrap();
        assert_eq!(a.get(), 0);
        assert_eq!(b.get(), 1);
        assert_eq!(s.len_active(), 2);
    }

    #[test]
    fn test_insert_rejects_wrong_dimension() {
        let s = store(3);
        let err = s.insert(vec![1.0, 2.0], meta(0)).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_get_and_delete() {
        let s = store(2);
        let id = s.insert(vec![1.0, 0.0], meta(0)).unwrap();

        let record = s.get(id).unwrap();
        assert_eq!(record.vector, vec![1.0, 0.0]);
        assert_eq!(record.metadata, meta(0));

        s.delete(id).unwrap();
        assert!(matches!(s.get(id), Err(IndexError::NotFound(_))));
        assert_eq!(s.len_active(), 0);
        assert_eq!(s.len_deleted(), 1);
    }

    #[test]
    fn test_double_delete_is_error() {
        let s = store(2);
        let id = s.insert(vec![1.0, 0.0], meta(0)).unwrap();
        s.delete(id).unwrap();
        assert!(matches!(s.delete(id), Err(IndexError::NotFound(_))));
    }

    #[test]
    fn test_delete_unknown_id_is_error() {
        let s = store(2);
        assert!(matches!(
            s.delete(VectorId::new(99)),
            Err(IndexError::NotFound(_))
        ));
    }

    #[test]
    fn test_all_active_skips_tombstones_and_keeps_order() {
        let s = store(2);
        let a = s.insert(vec![1.0, 0.0], meta(0)).unwrap();
        let b = s.insert(vec![0.0, 1.0], meta(1)).unwrap();
        let c = s.insert(vec![1.0, 1.0], meta(2)).unwrap();
        s.delete(b).unwrap();

        let active = s.all_active();
        let ids: Vec<VectorId> = active.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn test_ids_not_reused_after_compaction() {
        let s = store(2);
        let a = s.insert(vec![1.0, 0.0], meta(0)).unwrap();
        s.delete(a).unwrap();
        s.compact().unwrap();
        assert_eq!(s.len_total(), 0);

        let b = s.insert(vec![0.0, 1.0], meta(1)).unwrap();
        assert_eq!(b.get(), 1, "compaction must not reuse ids");
    }

    #[test]
    fn test_durable_store_replays() {
        let dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(2).unwrap();

        {
            let (s, ops) = RecordStore::open(dim, dir.path()).unwrap();
            assert_eq!(ops, 0);
            let a = s.insert(vec![1.0, 0.0], meta(0)).unwrap();
            s.insert(vec![0.0, 1.0], meta(1)).unwrap();
            s.delete(a).unwrap();
        }

        let (s, ops) = RecordStore::open(dim, dir.path()).unwrap();
        assert_eq!(ops, 3);
        assert_eq!(s.len_active(), 1);
        assert_eq!(s.len_deleted(), 1);

        // Ids continue from where the log left off
        let c = s.insert(vec![1.0, 1.0], meta(2)).unwrap();
        assert_eq!(c.get(), 2);
    }

    #[test]
    fn test_ids_not_reused_after_compaction_and_reopen() {
        let dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(2).unwrap();

        {
            let (s, _) = RecordStore::open(dim, dir.path()).unwrap();
            s.insert(vec![1.0, 0.0], meta(0)).unwrap();
            let b = s.insert(vec![0.0, 1.0], meta(1)).unwrap();
            assert_eq!(b.get(), 1);

            // The highest id is tombstoned, so compaction drops it from
            // the log entirely
            s.delete(b).unwrap();
            s.compact().unwrap();
        }

        let (s, _) = RecordStore::open(dim, dir.path()).unwrap();
        let c = s.insert(vec![1.0, 1.0], meta(2)).unwrap();
        assert_eq!(c.get(), 2, "id 1 was assigned once and must stay retired");
    }

    #[test]
    fn test_durable_compaction_roundtrip() {
        let dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(2).unwrap();

        {
            let (s, _) = RecordStore::open(dim, dir.path()).unwrap();
            let a = s.insert(vec![1.0, 0.0], meta(0)).unwrap();
            s.insert(vec![0.0, 1.0], meta(1)).unwrap();
            s.delete(a).unwrap();
            s.compact().unwrap();
        }

        let (s, ops) = RecordStore::open(dim, dir.path()).unwrap();
        assert_eq!(ops, 1, "compacted log holds only live records");
        assert_eq!(s.len_active(), 1);
        assert_eq!(s.len_deleted(), 0);
    }
}
