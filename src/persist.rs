//! Durable state: the append-only record log and the index snapshot.
//!
//! The log is the source of truth. It only ever grows: inserts append a
//! record frame, deletes append a tombstone frame, and vectors are never
//! mutated in place. Compaction rewrites the log without tombstoned
//! records and atomically renames it over the old file.
//!
//! The cluster index snapshot is a derived cache. It can be deleted at any
//! time and rebuilt from the log; a snapshot from an older format version
//! is discarded with a warning. A snapshot or log that fails an integrity
//! check is surfaced as `CorruptPersistedState` and never repaired
//! silently.
//!
//! # Log format
//! - Header (20 bytes): magic `RGST`, format version u32, dimension u32,
//!   id high-water mark u64
//! - Insert frame: tag 0x01, id u64, `dim` f32 values, metadata length
//!   u32, metadata JSON, 4-byte checksum
//! - Delete frame: tag 0x02, id u64, 4-byte checksum
//!
//! The high-water mark records the next id to allocate as of the last
//! compaction. Appends do not rewrite it; ids appended after compaction
//! are visible as frames, so the next id on replay is the maximum of the
//! header value and the highest frame id plus one. Without it, compacting
//! away the highest-id record would let a reopen re-allocate that id.
//!
//! All integers and floats are little-endian. The checksum is the first
//! four bytes of the SHA-256 of the frame body.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use sha2::{Digest, Sha256};

use crate::error::{IndexError, IndexResult};
use crate::index::ClusterIndex;
use crate::types::{ChunkMetadata, VectorDimension, VectorId};

/// Magic bytes identifying a record log.
const MAGIC_BYTES: &[u8; 4] = b"RGST";

/// Current log format version.
const LOG_VERSION: u32 = 1;

/// Current snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// Size of the log header in bytes.
const HEADER_SIZE: usize = 20;

/// Frame checksum width in bytes.
const CHECKSUM_SIZE: usize = 4;

const TAG_INSERT: u8 = 0x01;
const TAG_DELETE: u8 = 0x02;

const LOG_FILE: &str = "records.log";
const SNAPSHOT_FILE: &str = "index.json";

/// One replayed log operation.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Insert {
        id: VectorId,
        vector: Vec<f32>,
        metadata: ChunkMetadata,
    },
    Delete {
        id: VectorId,
    },
}

/// Everything recovered from an existing log on open.
#[derive(Debug)]
pub struct LogReplay {
    /// Every frame in log order.
    pub entries: Vec<LogEntry>,

    /// Id high-water mark from the header. The next id to allocate is at
    /// least this, regardless of which records survived compaction.
    pub next_id: u64,
}

/// Append handle over the record log.
#[derive(Debug)]
pub struct RecordLog {
    path: PathBuf,
    file: File,
    dim: VectorDimension,
}

impl RecordLog {
    /// Opens the log in `dir`, creating it if absent, and replays any
    /// existing frames.
    ///
    /// Fails with `CorruptPersistedState` on any integrity violation and
    /// with `DimensionMismatch` when the file was written with a different
    /// dimension than configured.
    pub fn open_or_create(
        dir: impl AsRef<Path>,
        dim: VectorDimension,
    ) -> IndexResult<(Self, LogReplay)> {
        std::fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(LOG_FILE);

        let replay = if path.exists() {
            Self::replay(&path, dim)?
        } else {
            let mut file = File::create(&path)?;
            write_header(&mut file, dim, 0)?;
            file.flush()?;
            LogReplay {
                entries: Vec::new(),
                next_id: 0,
            }
        };

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok((Self { path, file, dim }, replay))
    }

    /// Appends an insert frame.
    pub fn append_insert(
        &mut self,
        id: VectorId,
        vector: &[f32],
        metadata: &ChunkMetadata,
    ) -> IndexResult<()> {
        let frame = encode_insert(id, vector, metadata)?;
        self.file.write_all(&frame)?;
        self.file.flush()?;
        Ok(())
    }

    /// Appends a tombstone frame.
    pub fn append_delete(&mut self, id: VectorId) -> IndexResult<()> {
        let frame = encode_delete(id);
        self.file.write_all(&frame)?;
        self.file.flush()?;
        Ok(())
    }

    /// Rewrites the log with only the given live records, atomically
    /// replacing the old file.
    ///
    /// `next_id` is the caller's id high-water mark; it is persisted in
    /// the header so ids of compacted-away records are never re-allocated
    /// after a reopen.
    pub fn compact<'a, I>(&mut self, live: I, next_id: u64) -> IndexResult<()>
    where
        I: IntoIterator<Item = (VectorId, &'a [f32], &'a ChunkMetadata)>,
    {
        let tmp_path = self.path.with_extension("log.tmp");
        let mut tmp = File::create(&tmp_path)?;
        write_header(&mut tmp, self.dim, next_id)?;

        for (id, vector, metadata) in live {
            let frame = encode_insert(id, vector, metadata)?;
            tmp.write_all(&frame)?;
        }
        tmp.flush()?;
        tmp.sync_all()?;
        drop(tmp);

        std::fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }

    /// Validates and decodes every frame in the log at `path`.
    fn replay(path: &Path, dim: VectorDimension) -> IndexResult<LogReplay> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < HEADER_SIZE {
            return Err(IndexError::CorruptPersistedState(format!(
                "log file too small to contain header ({len} bytes)"
            )));
        }

        let mmap = unsafe { MmapOptions::new().map(&file)? };

        if &mmap[0..4] != MAGIC_BYTES {
            return Err(IndexError::CorruptPersistedState(
                "bad magic bytes in record log".to_string(),
            ));
        }
        let version = u32::from_le_bytes(mmap[4..8].try_into().unwrap());
        if version != LOG_VERSION {
            return Err(IndexError::CorruptPersistedState(format!(
                "unsupported log format version {version}, expected {LOG_VERSION}"
            )));
        }
        let file_dim = u32::from_le_bytes(mmap[8..12].try_into().unwrap()) as usize;
        if file_dim != dim.get() {
            return Err(IndexError::DimensionMismatch {
                expected: dim.get(),
                actual: file_dim,
            });
        }
        let next_id = u64::from_le_bytes(mmap[12..20].try_into().unwrap());

        let mut entries = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset < mmap.len() {
            let (entry, consumed) = decode_frame(&mmap[offset..], dim.get(), offset)?;
            entries.push(entry);
            offset += consumed;
        }

        tracing::debug!(entries = entries.len(), next_id, "replayed record log");
        Ok(LogReplay { entries, next_id })
    }
}

fn write_header(file: &mut File, dim: VectorDimension, next_id: u64) -> IndexResult<()> {
    file.write_all(MAGIC_BYTES)?;
    file.write_all(&LOG_VERSION.to_le_bytes())?;
    file.write_all(&(dim.get() as u32).to_le_bytes())?;
    file.write_all(&next_id.to_le_bytes())?;
    Ok(())
}

fn frame_checksum(body: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(body);
    [digest[0], digest[1], digest[2], digest[3]]
}

fn encode_insert(id: VectorId, vector: &[f32], metadata: &ChunkMetadata) -> IndexResult<Vec<u8>> {
    let meta_bytes = serde_json::to_vec(metadata)
        .map_err(|e| IndexError::CorruptPersistedState(format!("metadata encoding failed: {e}")))?;

    let mut body = Vec::with_capacity(1 + 8 + vector.len() * 4 + 4 + meta_bytes.len());
    body.push(TAG_INSERT);
    body.extend_from_slice(&id.to_bytes());
    for value in vector {
        body.extend_from_slice(&value.to_le_bytes());
    }
    body.extend_from_slice(&(meta_bytes.len() as u32).to_le_bytes());
    body.extend_from_slice(&meta_bytes);

    let checksum = frame_checksum(&body);
    body.extend_from_slice(&checksum);
    Ok(body)
}

fn encode_delete(id: VectorId) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + 8 + CHECKSUM_SIZE);
    body.push(TAG_DELETE);
    body.extend_from_slice(&id.to_bytes());
    let checksum = frame_checksum(&body);
    body.extend_from_slice(&checksum);
    body
}

/// Decodes one frame at the start of `buf`, returning it with the number
/// of bytes consumed. `file_offset` is only used for error messages.
fn decode_frame(buf: &[u8], dim: usize, file_offset: usize) -> IndexResult<(LogEntry, usize)> {
    let truncated = move || {
        IndexError::CorruptPersistedState(format!("truncated frame at byte {file_offset}"))
    };

    let tag = *buf.first().ok_or_else(truncated)?;
    match tag {
        TAG_INSERT => {
            let fixed = 1 + 8 + dim * 4 + 4;
            if buf.len() < fixed {
                return Err(truncated());
            }
            let id = VectorId::from_bytes(buf[1..9].try_into().unwrap());

            let mut vector = Vec::with_capacity(dim);
            for i in 0..dim {
                let start = 9 + i * 4;
                vector.push(f32::from_le_bytes(buf[start..start + 4].try_into().unwrap()));
            }

            let meta_len =
                u32::from_le_bytes(buf[9 + dim * 4..fixed].try_into().unwrap()) as usize;
            let total = fixed + meta_len + CHECKSUM_SIZE;
            if buf.len() < total {
                return Err(truncated());
            }

            let body = &buf[..fixed + meta_len];
            let stored: [u8; 4] = buf[fixed + meta_len..total].try_into().unwrap();
            if frame_checksum(body) != stored {
                return Err(IndexError::CorruptPersistedState(format!(
                    "checksum mismatch in insert frame at byte {file_offset}"
                )));
            }

            let metadata: ChunkMetadata = serde_json::from_slice(&buf[fixed..fixed + meta_len])
                .map_err(|e| {
                    IndexError::CorruptPersistedState(format!(
                        "invalid metadata in frame at byte {file_offset}: {e}"
                    ))
                })?;

            Ok((
                LogEntry::Insert {
                    id,
                    vector,
                    metadata,
                },
                total,
            ))
        }
        TAG_DELETE => {
            let total = 1 + 8 + CHECKSUM_SIZE;
            if buf.len() < total {
                return Err(truncated());
            }
            let body = &buf[..9];
            let stored: [u8; 4] = buf[9..total].try_into().unwrap();
            if frame_checksum(body) != stored {
                return Err(IndexError::CorruptPersistedState(format!(
                    "checksum mismatch in delete frame at byte {file_offset}"
                )));
            }
            let id = VectorId::from_bytes(buf[1..9].try_into().unwrap());
            Ok((LogEntry::Delete { id }, total))
        }
        other => Err(IndexError::CorruptPersistedState(format!(
            "unknown frame tag {other:#04x} at byte {file_offset}"
        ))),
    }
}

/// Persisted wrapper around the derived index snapshot.
#[derive(serde::Serialize, serde::Deserialize)]
struct SnapshotFile {
    format_version: u32,
    index: ClusterIndex,
}

/// Writes the index snapshot, atomically replacing any previous one.
pub fn save_snapshot(dir: impl AsRef<Path>, index: &ClusterIndex) -> IndexResult<()> {
    let wrapper = SnapshotFile {
        format_version: SNAPSHOT_VERSION,
        index: index.clone(),
    };
    let bytes = serde_json::to_vec(&wrapper)
        .map_err(|e| IndexError::CorruptPersistedState(format!("snapshot encoding failed: {e}")))?;

    let path = dir.as_ref().join(SNAPSHOT_FILE);
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Loads the index snapshot if one exists.
///
/// Returns `Ok(None)` when absent or written by an older format (the
/// snapshot is a rebuildable cache); fails with `CorruptPersistedState`
/// when present but unparseable.
pub fn load_snapshot(dir: impl AsRef<Path>) -> IndexResult<Option<ClusterIndex>> {
    let path = dir.as_ref().join(SNAPSHOT_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let bytes = std::fs::read(&path)?;
    let wrapper: SnapshotFile = serde_json::from_slice(&bytes).map_err(|e| {
        IndexError::CorruptPersistedState(format!(
            "invalid index snapshot {}: {e}",
            path.display()
        ))
    })?;

    if wrapper.format_version != SNAPSHOT_VERSION {
        tracing::warn!(
            found = wrapper.format_version,
            expected = SNAPSHOT_VERSION,
            "discarding index snapshot from older format, will rebuild from log"
        );
        return Ok(None);
    }

    Ok(Some(wrapper.index))
}

/// Deletes the index snapshot if present. Recovery hook for callers that
/// choose to discard a corrupt snapshot and rebuild from the log.
pub fn discard_snapshot(dir: impl AsRef<Path>) -> IndexResult<()> {
    let path = dir.as_ref().join(SNAPSHOT_FILE);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}
