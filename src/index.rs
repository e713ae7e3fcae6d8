//! Exact inner-product vector index keyed by chunk id.
//!
//! [`FlatIndex`] keeps an immutable snapshot behind
//! `RwLock<Arc<Snapshot>>`. Searches clone the `Arc` and release the lock
//! before scoring; every mutation builds a fresh snapshot and swaps it in.
//! A search running concurrently with [`VectorIndex::replace_all`] therefore
//! observes either the complete old index or the complete new one.
//!
//! The index is persisted as JSON:
//!
//! ```json
//! { "dims": 384, "entries": [ { "chunk_id": "…", "vector": "<base64 LE f32>" } ] }
//! ```

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::embedding::{blob_to_vec, dot, vec_to_blob};

/// A single search result.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub chunk_id: String,
    pub score: f32,
}

/// Vector storage with k-nearest-neighbour search by inner product.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Append vectors. `ids` and `vectors` must have equal length.
    async fn add(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()>;

    /// Up to `k` hits ordered by descending score.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>>;

    async fn clear(&self) -> Result<()>;

    /// Atomically replace the whole contents.
    async fn replace_all(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the current snapshot to durable storage.
    async fn persist(&self) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
struct Snapshot {
    dims: Option<usize>,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl Snapshot {
    fn with_entries(
        base: &Snapshot,
        ids: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<Snapshot> {
        if ids.len() != vectors.len() {
            bail!(
                "index add: {} ids but {} vectors",
                ids.len(),
                vectors.len()
            );
        }
        let mut next = base.clone();
        for (id, vector) in ids.iter().zip(vectors) {
            match next.dims {
                Some(d) if d != vector.len() => bail!(
                    "index dimension mismatch: expected {}, got {}",
                    d,
                    vector.len()
                ),
                None => next.dims = Some(vector.len()),
                _ => {}
            }
            next.ids.push(id.clone());
            next.vectors.push(vector.clone());
        }
        Ok(next)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        if self.ids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if let Some(d) = self.dims {
            if d != query.len() {
                bail!(
                    "query dimension mismatch: index has {}, query has {}",
                    d,
                    query.len()
                );
            }
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, dot(query, v)))
            .collect();

        // Stable sort keeps insertion order for ties.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| IndexHit {
                chunk_id: self.ids[i].clone(),
                score,
            })
            .collect())
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    dims: Option<usize>,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    chunk_id: String,
    vector: String,
}

/// Brute-force index over normalised vectors.
pub struct FlatIndex {
    path: Option<PathBuf>,
    state: RwLock<Arc<Snapshot>>,
    /// Serialises writers so the file always ends up holding the newest
    /// snapshot any of them observed.
    persist_lock: tokio::sync::Mutex<()>,
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A temp file next to `path`, unique within and across processes.
fn tmp_path(path: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "index.json".to_string());
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), n))
}

impl FlatIndex {
    /// An empty index with no backing file; [`VectorIndex::persist`] is a no-op.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(Arc::new(Snapshot::default())),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load from `path`. A missing file yields an empty index bound to it.
    pub fn load(path: &Path) -> Result<Self> {
        let snapshot = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read index file: {}", path.display()))?;
            let persisted: PersistedIndex = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse index file: {}", path.display()))?;
            decode(persisted)?
        } else {
            Snapshot::default()
        };

        tracing::debug!(path = %path.display(), vectors = snapshot.ids.len(), "index loaded");

        Ok(Self {
            path: Some(path.to_path_buf()),
            state: RwLock::new(Arc::new(snapshot)),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn current(&self) -> Result<Arc<Snapshot>> {
        self.state
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| anyhow!("index lock poisoned"))
    }

    fn swap(&self, next: Snapshot) -> Result<()> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| anyhow!("index lock poisoned"))?;
        *guard = Arc::new(next);
        Ok(())
    }
}

fn decode(persisted: PersistedIndex) -> Result<Snapshot> {
    let mut snapshot = Snapshot {
        dims: persisted.dims,
        ids: Vec::with_capacity(persisted.entries.len()),
        vectors: Vec::with_capacity(persisted.entries.len()),
    };
    for entry in persisted.entries {
        let bytes = STANDARD
            .decode(entry.vector.as_bytes())
            .with_context(|| format!("Corrupt vector for chunk {}", entry.chunk_id))?;
        let vector = blob_to_vec(&bytes);
        if let Some(d) = snapshot.dims {
            if d != vector.len() {
                bail!(
                    "Index file vector for chunk {} has {} dims, expected {}",
                    entry.chunk_id,
                    vector.len(),
                    d
                );
            }
        }
        snapshot.ids.push(entry.chunk_id);
        snapshot.vectors.push(vector);
    }
    Ok(snapshot)
}

fn encode(snapshot: &Snapshot) -> PersistedIndex {
    PersistedIndex {
        dims: snapshot.dims,
        entries: snapshot
            .ids
            .iter()
            .zip(&snapshot.vectors)
            .map(|(id, v)| PersistedEntry {
                chunk_id: id.clone(),
                vector: STANDARD.encode(vec_to_blob(v)),
            })
            .collect(),
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    async fn add(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| anyhow!("index lock poisoned"))?;
        let next = Snapshot::with_entries(&guard, ids, vectors)?;
        *guard = Arc::new(next);
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        let snapshot = self.current()?;
        snapshot.search(query, k)
    }

    async fn clear(&self) -> Result<()> {
        self.swap(Snapshot::default())
    }

    async fn replace_all(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        let next = Snapshot::with_entries(&Snapshot::default(), ids, vectors)?;
        self.swap(next)
    }

    fn len(&self) -> usize {
        self.current().map(|s| s.ids.len()).unwrap_or(0)
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.current()?;
        let json = serde_json::to_string(&encode(&snapshot))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create index directory: {}", parent.display())
                })?;
            }
        }
        // Write-then-rename so a crash never leaves a truncated index.
        let tmp = tmp_path(path);
        if let Err(e) = tokio::fs::write(&tmp, json).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("Failed to write index file: {}", tmp.display()));
        }
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace index file: {}", path.display()))?;

        tracing::debug!(path = %path.display(), vectors = snapshot.ids.len(), "index persisted");
        Ok(())
    }
}
