//! Shared fixtures: a deterministic bag-of-words embedder and scripted
//! generation providers, so pipeline tests never touch the network.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prompt_rag::pipeline::{PipelineSettings, RagPipeline};
use prompt_rag_core::embedding::EmbeddingProvider;
use prompt_rag_core::generation::{GenerationProvider, GenerationRequest};
use prompt_rag_core::models::CorpusRecord;

pub const DIMS: usize = 256;

/// Any input containing this marker makes the embedding call fail.
pub const FAIL_MARKER: &str = "FAIL";
/// Any input containing this marker gets a vector one dimension short.
pub const SHORT_MARKER: &str = "SHORT";
/// Any input containing this marker gets a vector with a NaN component.
pub const NAN_MARKER: &str = "NOTANUMBER";

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Hashed bag of lowercase alphanumeric words.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIMS];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let bucket = (fnv1a(&token.to_lowercase()) % DIMS as u64) as usize;
        vector[bucket] += 1.0;
    }
    vector
}

// ─── Embedding ──────────────────────────────────────────────────────

pub struct HashEmbedder {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep before every call, to stretch loads out in concurrency tests.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if texts.iter().any(|t| t.contains(FAIL_MARKER)) {
            bail!("embedding service rejected input");
        }
        Ok(texts
            .iter()
            .map(|t| {
                if t.contains(SHORT_MARKER) {
                    vec![1.0; DIMS - 1]
                } else if t.contains(NAN_MARKER) {
                    let mut vector = embed_text(t);
                    vector[0] = f32::NAN;
                    vector
                } else {
                    embed_text(t)
                }
            })
            .collect())
    }
}

// ─── Generation ─────────────────────────────────────────────────────

/// Answers with a fixed summary and remembers the last request.
pub struct RecordingGenerator {
    last: Mutex<Option<GenerationRequest>>,
    calls: AtomicUsize,
}

impl RecordingGenerator {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for RecordingGenerator {
    fn provider_name(&self) -> &str {
        "recording"
    }

    fn model_name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(request.clone());
        Ok(format!("answer from {} prompts", request.context.len()))
    }
}

pub struct FailingGenerator;

#[async_trait]
impl GenerationProvider for FailingGenerator {
    fn provider_name(&self) -> &str {
        "failing"
    }

    fn model_name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        bail!("chat completion returned 503")
    }
}

// ─── Corpus ─────────────────────────────────────────────────────────

pub fn record(id: &str, content: &str, name: &str, category: &str, tags: &[&str]) -> CorpusRecord {
    CorpusRecord {
        id: id.to_string(),
        content: content.to_string(),
        name: name.to_string(),
        category: category.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

/// The two-prompt library used throughout: a SQL prompt and a summarizer.
pub fn sql_and_summary() -> Vec<CorpusRecord> {
    vec![
        record("p1", "Write a SQL query", "SQL Helper", "data", &["sql"]),
        record("p2", "Summarize this article", "Summarizer", "writing", &["summary"]),
    ]
}

pub fn library() -> Vec<CorpusRecord> {
    vec![
        record("l1", "Write a SQL query that joins two tables", "Join Builder", "data", &["sql", "join"]),
        record("l2", "Summarize this article in three bullet points", "Bullet Summary", "writing", &["summary"]),
        record("l3", "Translate the text into French", "French Translator", "language", &["translate"]),
        record("l4", "Explain this code line by line", "Code Explainer", "dev", &["code"]),
        record("l5", "Write unit tests for this function", "Test Writer", "dev", &["code", "tests"]),
        record("l6", "Draft a polite follow up email", "Email Drafter", "writing", &["email"]),
        record("l7", "Generate a SQL index for slow queries", "Index Advisor", "data", &["sql"]),
        record("l8", "Summarize meeting notes into action items", "Meeting Summary", "writing", &["summary", "meetings"]),
    ]
}

pub fn pipeline_with(settings: PipelineSettings) -> (Arc<RagPipeline>, Arc<RecordingGenerator>) {
    let generator = Arc::new(RecordingGenerator::new());
    let pipeline = RagPipeline::new(Arc::new(HashEmbedder::new()), generator.clone(), settings);
    (Arc::new(pipeline), generator)
}

/// Pipeline on the in-memory index only.
pub fn memory_pipeline() -> (Arc<RagPipeline>, Arc<RecordingGenerator>) {
    pipeline_with(PipelineSettings::new(DIMS))
}
