//! Disk-backed [`VectorIndex`] on SQLite.
//!
//! The primary backend. Vectors are stored as little-endian `f32` BLOBs in
//! a `vectors` table; search scans them in insertion order, scores each by
//! cosine similarity and keeps the top `k` with a stable sort, so its
//! ordering matches [`MemoryIndex`](prompt_rag_core::index::memory::MemoryIndex)
//! exactly.
//!
//! # Lifecycle
//!
//! [`SqliteIndex::new`] returns an index that is not ready: inserts and
//! searches fail with [`IndexError::NotReady`] until
//! [`initialize`](SqliteIndex::initialize) succeeds. `initialize` never
//! returns an error; any failure is logged and reported as `false` so the
//! caller can fall back to the in-memory index.
//!
//! # Same-path re-initialization
//!
//! `initialize` on a path that already holds a store deletes that store
//! (including its `-wal` and `-shm` files) before creating a fresh one.
//! A crash between the delete and the rebuild leaves no primary store at
//! that path. The pipeline therefore never re-initializes a live path: every
//! load generation gets its own file from [`generation_store_path`], and the
//! previous file is removed only after the new generation has been swapped
//! in.
//!
//! # Ownership across processes
//!
//! Several processes may share one index directory (a running server and a
//! one-shot CLI search, say). Each store has a sibling `<store>.lock` file
//! that its owner holds an exclusive advisory lock on for as long as the
//! index is open. [`sweep_stale_stores`] only deletes stores whose lock it
//! can take, so it never removes a store that a live process is using. The
//! operating system releases the lock when the owner exits, which is what
//! makes a crashed process's store sweepable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use prompt_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use prompt_rag_core::index::{check_vector, rank_top_k, IndexError, IndexHit, VectorIndex};
use prompt_rag_core::models::Backend;

use crate::db;
use crate::migrate;

const STORE_PREFIX: &str = "vectors-";
const STORE_EXT: &str = ".sqlite";
const LOCK_EXT: &str = ".lock";

/// SQLite implementation of [`VectorIndex`].
pub struct SqliteIndex {
    pool: Option<SqlitePool>,
    path: Option<PathBuf>,
    dims: usize,
    lock: Option<StoreLock>,
}

impl SqliteIndex {
    pub fn new() -> Self {
        Self {
            pool: None,
            path: None,
            dims: 0,
            lock: None,
        }
    }

    /// Open a fresh store at `path` for vectors of `dims` dimensions.
    ///
    /// Returns `true` when the index is ready. On failure (unwritable
    /// directory, I/O error, schema mismatch, zero dimension) the error is
    /// logged, the index stays not ready and `false` is returned.
    pub async fn initialize(&mut self, path: &Path, dims: usize) -> bool {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        self.lock = None;
        match open_store(path, dims).await {
            Ok((pool, lock)) => {
                info!(path = %path.display(), dims, "primary vector index ready");
                self.pool = Some(pool);
                self.path = Some(path.to_path_buf());
                self.dims = dims;
                self.lock = Some(lock);
                true
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %format!("{:#}", e),
                    "primary vector index unavailable"
                );
                self.path = None;
                false
            }
        }
    }

    /// Location of the backing database file, once initialized.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the connection pool. The index is not ready afterwards.
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }

    /// Close the pool and delete the backing files, lock file included.
    pub async fn destroy(&self) -> Result<()> {
        self.close().await;
        if let Some(path) = &self.path {
            remove_store_files(path)?;
            remove_lock_file(path)?;
            debug!(path = %path.display(), "removed primary index store");
        }
        Ok(())
    }

    fn pool(&self) -> Result<&SqlitePool, IndexError> {
        match &self.pool {
            Some(pool) if !pool.is_closed() => Ok(pool),
            _ => Err(IndexError::NotReady),
        }
    }
}

impl Default for SqliteIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn storage_err(e: sqlx::Error) -> IndexError {
    IndexError::Storage(e.to_string())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn backend(&self) -> Backend {
        Backend::Primary
    }

    fn is_ready(&self) -> bool {
        self.pool().is_ok()
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn insert(&self, id: &str, vector: &[f32]) -> Result<(), IndexError> {
        let pool = self.pool()?;
        check_vector(self.dims, vector)?;

        // ON CONFLICT keeps the row's seq, so an overwrite keeps its rank.
        sqlx::query(
            r#"
            INSERT INTO vectors (id, embedding) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET embedding = excluded.embedding
            "#,
        )
        .bind(id)
        .bind(vec_to_blob(vector))
        .execute(pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        let pool = self.pool()?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT id, embedding FROM vectors ORDER BY seq ASC")
            .fetch_all(pool)
            .await
            .map_err(storage_err)?;

        let candidates: Vec<IndexHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                IndexHit {
                    id: row.get("id"),
                    score: cosine_similarity(query, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank_top_k(candidates, k))
    }

    async fn len(&self) -> Result<usize, IndexError> {
        let pool = self.pool()?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(pool)
            .await
            .map_err(storage_err)?;
        Ok(count as usize)
    }
}

async fn open_store(path: &Path, dims: usize) -> Result<(SqlitePool, StoreLock)> {
    if dims == 0 {
        anyhow::bail!("index dimension must be > 0");
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create index directory: {}", parent.display())
            })?;
        }
    }
    let lock = StoreLock::try_acquire(path)?
        .ok_or_else(|| anyhow::anyhow!("index store is locked by another process"))?;
    if path.exists() {
        remove_store_files(path)?;
    }

    let pool = db::connect(path).await?;
    if let Err(e) = migrate::create_index_schema(&pool, dims).await {
        pool.close().await;
        return Err(e);
    }
    Ok((pool, lock))
}

/// Exclusive advisory lock on `<store>.lock`, held while a store is in use.
/// Released when dropped or when the owning process exits.
struct StoreLock {
    _file: File,
}

impl StoreLock {
    /// Take the lock for `store`, or `None` if another owner holds it.
    fn try_acquire(store: &Path) -> Result<Option<Self>> {
        let path = lock_path(store);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open index lock file: {}", path.display()))?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Ok(None),
            Err(TryLockError::Error(e)) => {
                return Err(e)
                    .with_context(|| format!("Failed to lock index store: {}", path.display()))
            }
        }
        // A sweeper may have claimed and unlinked the file between open and lock.
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self { _file: file }))
    }
}

fn lock_path(store: &Path) -> PathBuf {
    let mut os = store.as_os_str().to_owned();
    os.push(LOCK_EXT);
    PathBuf::from(os)
}

fn remove_lock_file(store: &Path) -> Result<()> {
    let path = lock_path(store);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove index lock file: {}", path.display())),
    }
}

/// A fresh, unique store path inside `dir` for a new load generation.
pub fn generation_store_path(dir: &Path) -> PathBuf {
    dir.join(format!(
        "{}{}{}",
        STORE_PREFIX,
        uuid::Uuid::new_v4(),
        STORE_EXT
    ))
}

/// Delete a store file together with its WAL and shared-memory files.
/// Missing files are not an error.
pub fn remove_store_files(path: &Path) -> Result<()> {
    for file in store_files(path) {
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to remove index file: {}", file.display()))
            }
        }
    }
    Ok(())
}

fn store_files(path: &Path) -> [PathBuf; 3] {
    let with_suffix = |suffix: &str| {
        let mut os = path.as_os_str().to_owned();
        os.push(suffix);
        PathBuf::from(os)
    };
    [path.to_path_buf(), with_suffix("-wal"), with_suffix("-shm")]
}

/// Remove generation stores in `dir` that no live process owns, except
/// `keep`. Returns the number of stores removed.
///
/// Leftovers come from builds that were interrupted or cancelled before
/// they could be swapped in, and from processes that exited without
/// cleaning up. A store whose lock is held elsewhere is left alone.
pub fn sweep_stale_stores(dir: &Path, keep: Option<&Path>) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read index directory: {}", dir.display()))
        }
    };

    let mut bases = BTreeSet::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(base) = name.to_str().and_then(store_base_name) {
            bases.insert(base.to_string());
        }
    }

    let mut removed = 0;
    for base in bases {
        let store = dir.join(&base);
        if keep == Some(store.as_path()) {
            continue;
        }
        let Some(_claim) = StoreLock::try_acquire(&store)? else {
            debug!(path = %store.display(), "index store owned by a live process; keeping it");
            continue;
        };
        remove_store_files(&store)?;
        remove_lock_file(&store)?;
        removed += 1;
    }
    Ok(removed)
}

/// `vectors-<id>.sqlite` for any file belonging to a store, including its
/// `-wal`, `-shm` and `.lock` siblings.
fn store_base_name(name: &str) -> Option<&str> {
    let base = name
        .strip_suffix(LOCK_EXT)
        .or_else(|| name.strip_suffix("-wal"))
        .or_else(|| name.strip_suffix("-shm"))
        .unwrap_or(name);
    (base.starts_with(STORE_PREFIX) && base.ends_with(STORE_EXT)).then_some(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ids(hits: &[IndexHit]) -> Vec<&str> {
        hits.iter().map(|h| h.id.as_str()).collect()
    }

    async fn ready_index(tmp: &TempDir, dims: usize) -> SqliteIndex {
        let mut index = SqliteIndex::new();
        assert!(index.initialize(&tmp.path().join("v.sqlite"), dims).await);
        index
    }

    #[tokio::test]
    async fn test_not_ready_before_initialize() {
        let index = SqliteIndex::new();
        assert!(!index.is_ready());
        assert!(matches!(
            index.insert("a", &[1.0]).await,
            Err(IndexError::NotReady)
        ));
        assert!(matches!(
            index.search(&[1.0], 3).await,
            Err(IndexError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_initialize_fails_soft_on_unwritable_path() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let mut index = SqliteIndex::new();
        let ok = index.initialize(&blocker.join("v.sqlite"), 4).await;
        assert!(!ok);
        assert!(!index.is_ready());
    }

    #[tokio::test]
    async fn test_initialize_rejects_zero_dims() {
        let tmp = TempDir::new().unwrap();
        let mut index = SqliteIndex::new();
        assert!(!index.initialize(&tmp.path().join("v.sqlite"), 0).await);
    }

    #[tokio::test]
    async fn test_insert_and_search() {
        let tmp = TempDir::new().unwrap();
        let index = ready_index(&tmp, 2).await;
        index.insert("x", &[1.0, 0.0]).await.unwrap();
        index.insert("y", &[0.0, 1.0]).await.unwrap();
        index.insert("xy", &[1.0, 1.0]).await.unwrap();

        let hits = index.search(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(ids(&hits), vec!["x", "xy"]);
        assert_eq!(index.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_ties_and_overwrite_keep_insertion_order() {
        let tmp = TempDir::new().unwrap();
        let index = ready_index(&tmp, 2).await;
        index.insert("a", &[0.0, 1.0]).await.unwrap();
        index.insert("b", &[1.0, 0.0]).await.unwrap();
        index.insert("a", &[2.0, 0.0]).await.unwrap();

        assert_eq!(index.len().await.unwrap(), 2);
        let hits = index.search(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(ids(&hits), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        let index = ready_index(&tmp, 3).await;
        assert!(matches!(
            index.insert("a", &[1.0]).await,
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_reinitialize_same_path_discards_old_state() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.sqlite");

        let mut index = SqliteIndex::new();
        assert!(index.initialize(&path, 2).await);
        index.insert("old", &[1.0, 0.0]).await.unwrap();

        assert!(index.initialize(&path, 2).await);
        assert_eq!(index.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_destroy_removes_files() {
        let tmp = TempDir::new().unwrap();
        let path = generation_store_path(tmp.path());
        let mut index = SqliteIndex::new();
        assert!(index.initialize(&path, 2).await);
        index.insert("a", &[1.0, 0.0]).await.unwrap();

        assert!(lock_path(&path).exists());

        index.destroy().await.unwrap();
        assert!(!path.exists());
        assert!(!lock_path(&path).exists());
        assert!(!index.is_ready());
    }

    #[tokio::test]
    async fn test_sweep_skips_store_locked_by_another_owner() {
        let tmp = TempDir::new().unwrap();
        let owned = generation_store_path(tmp.path());
        let mut index = SqliteIndex::new();
        assert!(index.initialize(&owned, 2).await);
        index.insert("a", &[1.0, 0.0]).await.unwrap();

        // No `keep`: the store survives only because its lock is held.
        assert_eq!(sweep_stale_stores(tmp.path(), None).unwrap(), 0);
        assert!(owned.exists());
        assert_eq!(index.len().await.unwrap(), 1);

        // Once the owner lets go, the store is fair game.
        index.close().await;
        drop(index);
        assert_eq!(sweep_stale_stores(tmp.path(), None).unwrap(), 1);
        assert!(!owned.exists());
        assert!(!lock_path(&owned).exists());
    }

    #[tokio::test]
    async fn test_initialize_fails_soft_when_store_is_locked() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.sqlite");
        let first = ready_index(&tmp, 2).await;
        first.insert("a", &[1.0, 0.0]).await.unwrap();

        let mut second = SqliteIndex::new();
        assert!(!second.initialize(&path, 2).await);
        assert_eq!(first.len().await.unwrap(), 1);
    }

    #[test]
    fn test_sweep_keeps_live_store() {
        let tmp = TempDir::new().unwrap();
        let live = tmp.path().join("vectors-live.sqlite");
        let stale = tmp.path().join("vectors-stale.sqlite");
        let other = tmp.path().join("notes.txt");
        for p in [&live, &stale, &other] {
            std::fs::write(p, "x").unwrap();
        }
        std::fs::write(tmp.path().join("vectors-stale.sqlite-wal"), "x").unwrap();
        std::fs::write(tmp.path().join("vectors-orphan.sqlite.lock"), "").unwrap();

        let removed = sweep_stale_stores(tmp.path(), Some(&live)).unwrap();
        assert_eq!(removed, 2);
        assert!(live.exists());
        assert!(!stale.exists());
        assert!(!tmp.path().join("vectors-stale.sqlite-wal").exists());
        assert!(!tmp.path().join("vectors-orphan.sqlite.lock").exists());
        assert!(other.exists());
    }

    #[test]
    fn test_sweep_missing_dir_is_noop() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(sweep_stale_stores(&tmp.path().join("nope"), None).unwrap(), 0);
    }
}
