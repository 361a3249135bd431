//! Core data models that flow through the retrieval pipeline.
//!
//! A [`CorpusRecord`] is what the caller hands to the pipeline; the
//! document store keeps a [`StoredItem`] per id, and indices only ever hold
//! ids that point back into the store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One prompt in the corpus, as read from the JSON export.
///
/// The export format names the body `prompt`; `content` is accepted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    pub id: String,
    #[serde(alias = "prompt")]
    pub content: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CorpusRecord {
    /// Text sent to the embedding provider for this record.
    ///
    /// Name and tags are appended to the body so short prompts still carry
    /// enough signal: `"{content} | {name} | {tag1, tag2}"`.
    pub fn embedding_input(&self) -> String {
        format!("{} | {} | {}", self.content, self.name, self.tags.join(", "))
    }

    pub fn to_stored(&self) -> StoredItem {
        StoredItem {
            content: self.content.clone(),
            name: self.name.clone(),
            category: self.category.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Content and metadata held by the [`DocumentStore`](crate::store::DocumentStore).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredItem {
    pub content: String,
    pub name: String,
    pub category: String,
    pub tags: Vec<String>,
}

/// Which similarity backend served a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Disk-backed SQLite vector store.
    Primary,
    /// In-memory index, always available.
    Secondary,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Primary => "primary",
            Backend::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response language requested for a synthesized answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Tr,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Tr => "tr",
        }
    }

    /// Instruction line appended to the generation prompt.
    pub fn instruction(&self) -> &'static str {
        match self {
            Language::En => "Respond in English.",
            Language::Tr => "Respond in Turkish.",
        }
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "tr" => Ok(Language::Tr),
            other => anyhow::bail!("unsupported language '{}': expected en or tr", other),
        }
    }
}
