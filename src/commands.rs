//! One-shot CLI commands: build the pipeline, load the corpus, run a
//! single operation, print the result.
//!
//! Each command closes its pipeline before returning, error or not, so the
//! generation's index store does not outlive the process.

use anyhow::Result;
use std::sync::Arc;

use prompt_rag_core::models::Language;

use crate::config::Config;
use crate::corpus::load_corpus;
use crate::pipeline::{ItemOutcome, LoadReport, RagPipeline};

async fn ready_pipeline(config: &Config) -> Result<(Arc<RagPipeline>, LoadReport)> {
    let pipeline = Arc::new(RagPipeline::from_config(config)?);
    let corpus = load_corpus(&config.corpus.path)?;
    let report = pipeline.initialize(corpus).await;
    Ok((pipeline, report))
}

/// `promptrag index`: load and index the corpus, then print the report.
pub async fn run_index(config: &Config) -> Result<()> {
    let (pipeline, report) = ready_pipeline(config).await?;
    pipeline.close().await;

    println!("Indexed {} of {} records (backend: {})", report.indexed, report.total, report.backend);
    if report.duplicates > 0 {
        println!("  duplicates: {}", report.duplicates);
    }
    for outcome in &report.outcomes {
        if let ItemOutcome::Skipped { id, reason } = outcome {
            println!("  skipped {}: {}", id, reason);
        }
    }
    Ok(())
}

/// `promptrag search`.
pub async fn run_search(config: &Config, query: &str, top_k: Option<usize>, json: bool) -> Result<()> {
    let (pipeline, _) = ready_pipeline(config).await?;
    let top_k = top_k.unwrap_or(config.retrieval.search_top_k);
    let response = pipeline.search(query, top_k).await;
    pipeline.close().await;
    let response = response?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in response.results.iter().enumerate() {
        println!("{}. [{:.4}] {} ({}) {}", i + 1, hit.score, hit.name, hit.category, hit.id);
        if !hit.tags.is_empty() {
            println!("   tags: {}", hit.tags.join(", "));
        }
    }
    println!("backend: {}", response.backend);
    Ok(())
}

/// `promptrag ask`.
pub async fn run_ask(config: &Config, query: &str, top_k: Option<usize>, language: Language) -> Result<()> {
    let (pipeline, _) = ready_pipeline(config).await?;
    let top_k = top_k.unwrap_or(config.retrieval.ask_top_k);
    let response = pipeline.ask(query, top_k, language).await;
    pipeline.close().await;
    let response = response?;

    println!("{}", response.answer);
    if !response.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &response.sources {
            println!("  - {} ({}) [{:.4}]", source.name, source.id, source.score);
        }
    }
    Ok(())
}
