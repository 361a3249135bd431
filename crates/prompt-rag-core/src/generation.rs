//! Generation provider trait and grounded prompt assembly.
//!
//! The pipeline hands a [`GenerationRequest`] (query, response language and
//! a bounded list of retrieved prompts) to a [`GenerationProvider`].
//! Providers render it with [`render_prompt`], which binds the answer to the
//! retrieved context and the requested language.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Language;
use crate::search::SearchHit;

/// One retrieved prompt passed to the generator as context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub content: String,
}

impl ContextItem {
    /// `[category] name: content`
    pub fn render(&self) -> String {
        format!("[{}] {}: {}", self.category, self.name, self.content)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub query: String,
    pub language: Language,
    pub context: Vec<ContextItem>,
}

/// System and user messages for a chat-style model.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessages {
    pub system: String,
    pub user: String,
}

/// An external answer-synthesis capability.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Short provider tag reported alongside answers (e.g. `"openai"`).
    fn provider_name(&self) -> &str;
    fn model_name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Build a context window from ranked hits.
///
/// Items are taken in rank order until their rendered size reaches
/// `max_chars`; the item that crosses the limit is cut to fit. Sizes are
/// counted in characters.
pub fn build_context(hits: &[SearchHit], max_chars: usize) -> Vec<ContextItem> {
    let mut items = Vec::new();
    let mut used = 0usize;

    for hit in hits {
        if used >= max_chars {
            break;
        }
        let mut item = ContextItem {
            id: hit.id.clone(),
            name: hit.name.clone(),
            category: hit.category.clone(),
            content: hit.content.clone(),
        };
        let rendered = item.render().chars().count();
        let remaining = max_chars - used;
        if rendered > remaining {
            let overhead = rendered - item.content.chars().count();
            if overhead >= remaining {
                break;
            }
            item.content = item.content.chars().take(remaining - overhead).collect();
            used = max_chars;
        } else {
            used += rendered;
        }
        items.push(item);
    }

    items
}

/// Render the grounding instruction and question for a chat model.
pub fn render_prompt(request: &GenerationRequest) -> PromptMessages {
    let system = format!(
        "You are a helpful prompt engineering assistant.\n\
         Use ONLY the context below to answer the user's question.\n\
         If the context doesn't contain relevant information, say so.\n\
         {}",
        request.language.instruction()
    );

    let context = if request.context.is_empty() {
        "(no matching prompts were retrieved)".to_string()
    } else {
        request
            .context
            .iter()
            .map(ContextItem::render)
            .collect::<Vec<_>>()
            .join("\n")
    };

    let user = format!(
        "## Retrieved Prompts (Context)\n{}\n\n\
         ## User Question\n{}\n\n\
         ## Instructions\n\
         1. Identify the most relevant prompts from the context\n\
         2. Synthesize a helpful answer that recommends specific prompts\n\
         3. Explain WHY each recommended prompt is relevant\n\
         4. Keep your answer concise and actionable",
        context, request.query
    );

    PromptMessages { system, user }
}
