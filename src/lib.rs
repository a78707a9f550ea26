//! Embedded approximate-nearest-neighbor vector store for RAG pipelines.
//!
//! Stores embeddings of code chunks and answers "find the K most similar
//! chunks to this query vector" fast enough to stay useful as the corpus
//! grows to hundreds of thousands of chunks.
//!
//! # Architecture
//! The index is IVFFlat-style: k-means clustering partitions the stored
//! vectors into `nlist` clusters, and a query compares against every
//! centroid but scans only the `nprobe` nearest clusters. Exact brute
//! force is available as a fallback and as an explicit per-query option.
//! Inserts and deletes between rebuilds are tracked as drift and unioned
//! into every approximate query, so results are never silently missing
//! recent writes.
//!
//! # Durability
//! With a data directory configured, records go to an append-only log
//! (the source of truth) and the built index is snapshotted separately as
//! a derived, rebuildable cache.
//!
//! # Example
//! ```
//! use ragstore::{ChunkMetadata, IndexConfig, IndexManager, SearchOptions};
//!
//! let manager = IndexManager::new(IndexConfig::new(2)).unwrap();
//! let id = manager
//!     .insert(
//!         vec![1.0, 0.0],
//!         ChunkMetadata {
//!             source_path: "src/lib.rs".to_string(),
//!             chunk_index: 0,
//!             content_hash: "abc123".to_string(),
//!         },
//!     )
//!     .unwrap();
//!
//! let results = manager.search(&[1.0, 0.0], 1, &SearchOptions::exact()).unwrap();
//! assert_eq!(results[0].id, id);
//! ```

pub mod clustering;
pub mod config;
pub mod error;
pub mod index;
pub mod manager;
pub mod persist;
pub mod similarity;
pub mod store;
pub mod types;

// Explicit exports for better API clarity
pub use clustering::{Clustering, lloyd_clustering};
pub use config::IndexConfig;
pub use error::{IndexError, IndexResult};
pub use index::{Cluster, ClusterIndex};
pub use manager::{BuildReport, IndexManager, IndexStats, SearchOptions};
pub use similarity::{cosine_similarity, euclidean_distance};
pub use store::{RecordStore, VectorRecord};
pub use types::{
    ChunkMetadata, Distance, IndexState, SearchResult, VectorDimension, VectorId,
};
