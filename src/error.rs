use prompt_rag_core::index::IndexError;
use thiserror::Error;

pub type RagResult<T> = Result<T, RagError>;

/// Failures surfaced by [`RagPipeline`](crate::pipeline::RagPipeline) queries.
///
/// `NotReady` is distinct from an empty result: it means no load generation
/// exists yet. Provider errors are carried unmodified.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("RAG pipeline not ready")]
    NotReady,

    #[error("query must not be empty")]
    EmptyQuery,

    #[error("query embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("answer generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error(transparent)]
    Index(#[from] IndexError),
}
