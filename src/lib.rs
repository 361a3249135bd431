//! # Prompt RAG
//!
//! Retrieval-augmented search over a prompt library.
//!
//! A JSON export of prompts is embedded into a vector index; queries are
//! embedded the same way and ranked by cosine similarity, and `ask` hands the
//! top matches to a chat model as grounding context.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │   Corpus    │──▶│   Pipeline   │──▶│ SQLite index (disk) │
//! │ JSON export │   │ embed + swap │   │ or in-memory index │
//! └─────────────┘   └──────┬───────┘   └────────────────────┘
//!                          │
//!                ┌─────────┴─────────┐
//!                ▼                   ▼
//!          ┌──────────┐        ┌──────────┐
//!          │   CLI    │        │   HTTP   │
//!          │promptrag │        │  (axum)  │
//!          └──────────┘        └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`corpus`] | Corpus file loading |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama) |
//! | [`generation`] | Answer generation providers |
//! | [`pipeline`] | Load lifecycle, search, ask, health |
//! | [`sqlite_index`] | Disk-backed primary vector index |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Index schema |

pub mod commands;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod http;
pub mod migrate;
pub mod pipeline;
pub mod server;
pub mod sqlite_index;
