//! Retrieval pipeline orchestrator.
//!
//! [`RagPipeline`] owns the load lifecycle and backend selection and exposes
//! the query operations:
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`initialize`](RagPipeline::initialize) | Build the first load generation from a corpus |
//! | [`reload`](RagPipeline::reload) | Rebuild from a new corpus (or the current one) |
//! | [`search`](RagPipeline::search) | Embed a query and rank stored prompts |
//! | [`ask`](RagPipeline::ask) | Search, then synthesize a grounded answer |
//! | [`health`](RagPipeline::health) | Read-only readiness snapshot |
//!
//! # Load generations
//!
//! Every initialize/reload builds a complete *generation* (document store,
//! in-memory index, optional SQLite index, chosen backend) off to the side,
//! then swaps it in under a write lock. Queries hold the read lock only
//! while they read the index and the document store, so they observe either
//! the whole previous generation or the whole new one. Loads are serialized
//! by a separate mutex. The replaced generation's SQLite store is deleted
//! after the swap, never before.
//!
//! # Phases
//!
//! `Uninitialized → Initializing → Ready`, and `Ready → Initializing` while
//! a reload runs. Queries are rejected with [`RagError::NotReady`] only while
//! no generation exists; during a reload they are served by the previous
//! generation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use prompt_rag_core::embedding::{embed_one, EmbeddingProvider};
use prompt_rag_core::generation::{build_context, GenerationProvider, GenerationRequest};
use prompt_rag_core::index::memory::MemoryIndex;
use prompt_rag_core::index::{check_vector, VectorIndex};
use prompt_rag_core::models::{Backend, CorpusRecord, Language, StoredItem};
use prompt_rag_core::search::{hydrate, SearchHit, SourceRef};
use prompt_rag_core::store::DocumentStore;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::{RagError, RagResult};
use crate::generation::create_generator;
use crate::sqlite_index::{generation_store_path, sweep_stale_stores, SqliteIndex};

/// Tuning knobs for a [`RagPipeline`], decoupled from the config file.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Directory for SQLite index stores. `None` disables the primary backend.
    pub index_dir: Option<PathBuf>,
    /// Embedding dimensionality accepted by both indices.
    pub dims: usize,
    /// Texts per embedding call during a load.
    pub batch_size: usize,
    /// Character budget for the context handed to the generator.
    pub max_context_chars: usize,
    /// Characters of content included in each `ask` source.
    pub snippet_chars: usize,
}

impl PipelineSettings {
    pub fn new(dims: usize) -> Self {
        Self {
            index_dir: None,
            dims,
            batch_size: 64,
            max_context_chars: 8_000,
            snippet_chars: 200,
        }
    }

    pub fn with_index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.index_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    Uninitialized,
    Initializing,
    Ready,
    /// [`RagPipeline::close`] released the served generation.
    Closed,
}

/// What happened to one corpus record during a load.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Indexed { id: String },
    Skipped { id: String, reason: String },
}

impl ItemOutcome {
    pub fn id(&self) -> &str {
        match self {
            ItemOutcome::Indexed { id } | ItemOutcome::Skipped { id, .. } => id,
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, ItemOutcome::Indexed { .. })
    }
}

/// Aggregate result of one initialize/reload.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub generation: u64,
    pub backend: Backend,
    /// Records in the corpus, duplicates included.
    pub total: usize,
    /// Distinct ids present in the active index.
    pub indexed: usize,
    pub skipped: usize,
    /// Records superseded by a later record with the same id.
    pub duplicates: usize,
    /// Items in the document store.
    pub documents: usize,
    pub outcomes: Vec<ItemOutcome>,
}

impl LoadReport {
    pub fn item_count(&self) -> usize {
        self.indexed
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub ready: bool,
    pub phase: PipelinePhase,
    pub backend: Option<Backend>,
    pub item_count: usize,
    pub document_count: usize,
    pub primary_ready: bool,
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub backend: Backend,
    pub results: Vec<SearchHit>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub query: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub grounded: bool,
    pub backend: Backend,
    pub provider: String,
    pub language: Language,
}

/// One immutable load generation.
struct Generation {
    number: u64,
    documents: DocumentStore,
    secondary: MemoryIndex,
    primary: Option<SqliteIndex>,
    backend: Backend,
    report: LoadReport,
    corpus: Arc<Vec<CorpusRecord>>,
}

impl Generation {
    fn active(&self) -> &dyn VectorIndex {
        match (self.backend, &self.primary) {
            (Backend::Primary, Some(primary)) => primary as &dyn VectorIndex,
            _ => &self.secondary,
        }
    }

    /// Release the generation's on-disk store after it has been replaced.
    async fn retire(&self) {
        if let Some(primary) = &self.primary {
            if let Err(e) = primary.destroy().await {
                warn!(generation = self.number, error = %format!("{:#}", e), "failed to remove retired index store");
            }
        }
    }
}

/// Restores the previous phase if a load is dropped before it completes.
struct PhaseGuard<'a> {
    phase: &'a parking_lot::Mutex<PipelinePhase>,
    previous: PipelinePhase,
    done: bool,
}

impl<'a> PhaseGuard<'a> {
    fn enter(phase: &'a parking_lot::Mutex<PipelinePhase>) -> Self {
        let previous = std::mem::replace(&mut *phase.lock(), PipelinePhase::Initializing);
        Self {
            phase,
            previous,
            done: false,
        }
    }

    fn complete(mut self) {
        *self.phase.lock() = PipelinePhase::Ready;
        self.done = true;
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            *self.phase.lock() = self.previous;
        }
    }
}

/// The retrieval pipeline. Construct once and share behind an `Arc`.
pub struct RagPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    settings: PipelineSettings,
    current: RwLock<Option<Arc<Generation>>>,
    load_lock: Mutex<()>,
    phase: parking_lot::Mutex<PipelinePhase>,
    generations: AtomicU64,
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            embedder,
            generator,
            settings,
            current: RwLock::new(None),
            load_lock: Mutex::new(()),
            phase: parking_lot::Mutex::new(PipelinePhase::Uninitialized),
            generations: AtomicU64::new(0),
        }
    }

    /// Build the providers and settings described by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let settings = PipelineSettings {
            index_dir: config.index.dir.clone(),
            dims: config.embedding.dims.unwrap_or_else(|| embedder.dims()),
            batch_size: config.embedding.batch_size,
            max_context_chars: config.retrieval.max_context_chars,
            snippet_chars: config.retrieval.snippet_chars,
        };
        Ok(Self::new(embedder, generator, settings))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Index `corpus` and make it the served generation.
    ///
    /// Never fails: an unavailable primary backend falls back to the
    /// in-memory index, and items that cannot be embedded are skipped and
    /// reported.
    pub async fn initialize(&self, corpus: Vec<CorpusRecord>) -> LoadReport {
        self.load(Some(corpus)).await
    }

    /// Rebuild from `corpus`, or from the current generation's corpus when
    /// `None`.
    pub async fn reload(&self, corpus: Option<Vec<CorpusRecord>>) -> LoadReport {
        self.load(corpus).await
    }

    async fn load(&self, corpus: Option<Vec<CorpusRecord>>) -> LoadReport {
        let _exclusive = self.load_lock.lock().await;

        let (corpus, live_store) = {
            let current = self.current.read().await;
            let corpus = match corpus {
                Some(records) => Arc::new(records),
                None => current
                    .as_ref()
                    .map(|g| g.corpus.clone())
                    .unwrap_or_default(),
            };
            let live_store = current
                .as_ref()
                .and_then(|g| g.primary.as_ref())
                .and_then(|p| p.path().map(|p| p.to_path_buf()));
            (corpus, live_store)
        };

        let phase = PhaseGuard::enter(&self.phase);
        let number = self.generations.fetch_add(1, Ordering::SeqCst) + 1;

        let generation = self.build(number, corpus, live_store).await;
        let report = generation.report.clone();

        // Phase and generation change together so `health` never pairs a
        // new phase with an old generation.
        let previous = {
            let mut current = self.current.write().await;
            let previous = current.replace(Arc::new(generation));
            phase.complete();
            previous
        };

        info!(
            generation = report.generation,
            backend = %report.backend,
            total = report.total,
            indexed = report.indexed,
            skipped = report.skipped,
            duplicates = report.duplicates,
            "load generation ready"
        );

        if let Some(old) = previous {
            old.retire().await;
        }

        report
    }

    async fn build(
        &self,
        number: u64,
        corpus: Arc<Vec<CorpusRecord>>,
        live_store: Option<PathBuf>,
    ) -> Generation {
        let dims = self.settings.dims;

        let mut primary = match &self.settings.index_dir {
            Some(dir) => {
                match sweep_stale_stores(dir, live_store.as_deref()) {
                    Ok(0) => {}
                    Ok(n) => debug!(removed = n, "swept stale index stores"),
                    Err(e) => warn!(error = %format!("{:#}", e), "failed to sweep stale index stores"),
                }
                let mut index = SqliteIndex::new();
                if index.initialize(&generation_store_path(dir), dims).await {
                    Some(index)
                } else {
                    None
                }
            }
            None => None,
        };
        let mut backend = if primary.is_some() {
            Backend::Primary
        } else {
            Backend::Secondary
        };
        info!(generation = number, backend = %backend, records = corpus.len(), "building load generation");

        let secondary = MemoryIndex::new(dims);
        let mut documents = DocumentStore::new();

        // Last write wins: only the final record for each id is processed.
        let last_position: HashMap<&str, usize> = corpus
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.as_str(), i))
            .collect();

        let mut outcomes = Vec::with_capacity(corpus.len());
        let mut pending: Vec<&CorpusRecord> = Vec::with_capacity(corpus.len());
        let mut duplicates = 0;
        for (i, record) in corpus.iter().enumerate() {
            if last_position.get(record.id.as_str()) != Some(&i) {
                duplicates += 1;
                warn!(id = %record.id, "duplicate id in corpus; a later record replaces this one");
                outcomes.push(ItemOutcome::Skipped {
                    id: record.id.clone(),
                    reason: "superseded by a later record with the same id".to_string(),
                });
                continue;
            }
            documents.put(&record.id, record.to_stored());
            pending.push(record);
        }

        for batch in pending.chunks(self.settings.batch_size.max(1)) {
            let vectors = self.embed_batch(batch).await;
            for (record, embedded) in batch.iter().zip(vectors) {
                let vector = match embedded {
                    Ok(vector) => vector,
                    Err(reason) => {
                        warn!(id = %record.id, %reason, "skipping item: embedding failed");
                        outcomes.push(ItemOutcome::Skipped {
                            id: record.id.clone(),
                            reason,
                        });
                        continue;
                    }
                };

                if let Err(e) = secondary.insert(&record.id, &vector).await {
                    warn!(id = %record.id, error = %e, "skipping item: index rejected vector");
                    outcomes.push(ItemOutcome::Skipped {
                        id: record.id.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }

                if backend == Backend::Primary {
                    if let Some(index) = &primary {
                        if let Err(e) = index.insert(&record.id, &vector).await {
                            warn!(
                                id = %record.id,
                                error = %e,
                                "primary index insert failed; serving this generation from the in-memory index"
                            );
                            backend = Backend::Secondary;
                        }
                    }
                }

                outcomes.push(ItemOutcome::Indexed {
                    id: record.id.clone(),
                });
            }
        }

        if backend == Backend::Secondary {
            if let Some(index) = primary.take() {
                if let Err(e) = index.destroy().await {
                    warn!(error = %format!("{:#}", e), "failed to remove abandoned index store");
                }
            }
        }

        let indexed = outcomes.iter().filter(|o| o.is_indexed()).count();
        let report = LoadReport {
            generation: number,
            backend,
            total: corpus.len(),
            indexed,
            skipped: outcomes.len() - indexed - duplicates,
            duplicates,
            documents: documents.count(),
            outcomes,
        };

        Generation {
            number,
            documents,
            secondary,
            primary,
            backend,
            report,
            corpus,
        }
    }

    /// Embed a batch, isolating failures to single records.
    ///
    /// If the batch call fails or returns the wrong number of vectors, each
    /// record is retried on its own so one bad input cannot sink the rest.
    async fn embed_batch(&self, batch: &[&CorpusRecord]) -> Vec<Result<Vec<f32>, String>> {
        let texts: Vec<String> = batch.iter().map(|r| r.embedding_input()).collect();

        match self.embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors.into_iter().map(Ok).collect(),
            Ok(vectors) if texts.len() == 1 => vec![Err(format!(
                "embedding provider returned {} vectors for 1 input",
                vectors.len()
            ))],
            Err(e) if texts.len() == 1 => vec![Err(format!("{:#}", e))],
            Ok(vectors) => {
                warn!(
                    expected = texts.len(),
                    returned = vectors.len(),
                    "embedding batch size mismatch; embedding items one by one"
                );
                self.embed_each(&texts).await
            }
            Err(e) => {
                warn!(
                    size = texts.len(),
                    error = %format!("{:#}", e),
                    "embedding batch failed; embedding items one by one"
                );
                self.embed_each(&texts).await
            }
        }
    }

    async fn embed_each(&self, texts: &[String]) -> Vec<Result<Vec<f32>, String>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            let result = embed_one(self.embedder.as_ref(), text)
                .await
                .map_err(|e| format!("{:#}", e));
            results.push(result);
        }
        results
    }

    async fn ensure_ready(&self) -> RagResult<()> {
        if self.current.read().await.is_none() {
            return Err(RagError::NotReady);
        }
        Ok(())
    }

    /// Rank stored prompts against `query`, returning at most `top_k`.
    ///
    /// # Errors
    ///
    /// - [`RagError::NotReady`] before the first load completes.
    /// - [`RagError::EmptyQuery`] for a blank query.
    /// - [`RagError::Embedding`] if the query cannot be embedded.
    /// - [`RagError::Index`] if the active index fails.
    pub async fn search(&self, query: &str, top_k: usize) -> RagResult<SearchResponse> {
        self.ensure_ready().await?;
        let text = query.trim();
        if text.is_empty() {
            return Err(RagError::EmptyQuery);
        }

        let vector = embed_one(self.embedder.as_ref(), text)
            .await
            .map_err(RagError::Embedding)?;
        check_vector(self.settings.dims, &vector)
            .map_err(|e| RagError::Embedding(anyhow::anyhow!("query embedding rejected: {}", e)))?;

        let current = self.current.read().await;
        let generation = current.as_ref().ok_or(RagError::NotReady)?;
        let hits = generation.active().search(&vector, top_k).await?;
        let (results, dangling) = hydrate(&hits, &generation.documents);
        let backend = generation.backend;
        let number = generation.number;
        drop(current);

        if dangling > 0 {
            warn!(generation = number, dangling, "index returned ids missing from the document store");
        }
        debug!(generation = number, backend = %backend, top_k, hits = results.len(), "search served");

        Ok(SearchResponse {
            query: query.to_string(),
            backend,
            total: results.len(),
            results,
        })
    }

    /// Search for context, then synthesize an answer grounded in it.
    ///
    /// # Errors
    ///
    /// Everything [`search`](Self::search) can return, plus
    /// [`RagError::Generation`] if the generator fails. There is no fallback
    /// to a search-only response.
    pub async fn ask(&self, query: &str, top_k: usize, language: Language) -> RagResult<AskResponse> {
        let found = self.search(query, top_k).await?;

        let request = GenerationRequest {
            query: query.trim().to_string(),
            language,
            context: build_context(&found.results, self.settings.max_context_chars),
        };
        let answer = self
            .generator
            .generate(&request)
            .await
            .map_err(RagError::Generation)?;

        let sources: Vec<SourceRef> = found
            .results
            .iter()
            .map(|hit| SourceRef::from_hit(hit, self.settings.snippet_chars))
            .collect();

        Ok(AskResponse {
            query: found.query,
            answer,
            grounded: !sources.is_empty(),
            sources,
            backend: found.backend,
            provider: self.generator.provider_name().to_string(),
            language,
        })
    }

    /// Stop serving and delete the generation's on-disk store.
    ///
    /// Waits for an in-flight load to finish. Queries return
    /// [`RagError::NotReady`] afterwards; a later `initialize` starts over.
    pub async fn close(&self) {
        let _exclusive = self.load_lock.lock().await;
        let previous = {
            let mut current = self.current.write().await;
            *self.phase.lock() = PipelinePhase::Closed;
            current.take()
        };
        if let Some(old) = previous {
            old.retire().await;
            info!(generation = old.number, "pipeline closed");
        }
    }

    /// Look up an item in the document store, whether or not it was indexed.
    pub async fn get_item(&self, id: &str) -> RagResult<Option<StoredItem>> {
        let current = self.current.read().await;
        let generation = current.as_ref().ok_or(RagError::NotReady)?;
        Ok(generation.documents.get(id).cloned())
    }

    pub async fn health(&self) -> HealthSnapshot {
        let current = self.current.read().await;
        let phase = *self.phase.lock();
        match current.as_ref() {
            Some(g) => HealthSnapshot {
                ready: true,
                phase,
                backend: Some(g.backend),
                item_count: g.report.indexed,
                document_count: g.documents.count(),
                primary_ready: g.backend == Backend::Primary
                    && g.primary.as_ref().is_some_and(|p| p.is_ready()),
                generation: g.number,
            },
            None => HealthSnapshot {
                ready: false,
                phase,
                backend: None,
                item_count: 0,
                document_count: 0,
                primary_ready: false,
                generation: 0,
            },
        }
    }
}
