//! Corpus loading from the JSON prompt export.
//!
//! The file is a JSON array of records:
//!
//! ```json
//! [
//!   {"id": "p1", "prompt": "Write a SQL query", "name": "SQL", "category": "data", "tags": ["sql"]}
//! ]
//! ```
//!
//! `content` may be used instead of `prompt`; `tags` is optional.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use prompt_rag_core::models::CorpusRecord;

/// Read the corpus at `path`.
///
/// A missing file yields an empty corpus (logged as a warning) so a fresh
/// deployment still starts; a malformed file is an error.
pub fn load_corpus(path: &Path) -> Result<Vec<CorpusRecord>> {
    if !path.exists() {
        warn!(path = %path.display(), "corpus file not found; starting with an empty corpus");
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
    let records: Vec<CorpusRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse corpus file: {}", path.display()))?;

    info!(path = %path.display(), records = records.len(), "corpus loaded");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_export_format() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("prompts.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "p1", "prompt": "Write a SQL query", "name": "SQL", "category": "data", "tags": ["sql"]},
                {"id": "p2", "content": "Summarize this article", "name": "Sum", "category": "text"}
            ]"#,
        )
        .unwrap();

        let records = load_corpus(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, "Write a SQL query");
        assert_eq!(records[0].tags, vec!["sql".to_string()]);
        assert!(records[1].tags.is_empty());
    }

    #[test]
    fn test_missing_file_is_empty_corpus() {
        let tmp = TempDir::new().unwrap();
        let records = load_corpus(&tmp.path().join("absent.json")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_corpus(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse corpus file"));
    }
}
