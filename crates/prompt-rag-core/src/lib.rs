//! # Prompt RAG Core
//!
//! Shared, runtime-agnostic logic for Prompt RAG: corpus models, the
//! document store, the [`VectorIndex`](index::VectorIndex) abstraction with
//! its in-memory implementation, result hydration, and the embedding and
//! generation provider traits.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem code. The
//! disk-backed index, concrete providers and the pipeline orchestrator live
//! in the `prompt-rag` app crate.

pub mod embedding;
pub mod generation;
pub mod index;
pub mod models;
pub mod search;
pub mod store;
