//! ABOUTME: Transformation stage: fetch one article's text, chunk it, and enrich via the LM
//! ABOUTME: Output contract: {"summary": ..., "sentiment": ..., "classification": ...}

use crate::collaborators::{DocStore, Enrichment, LlmClient, VectorIndex};
use async_trait::async_trait;
use newsflow_core::NewsflowError;
use newsflow_worker::TaskHandler;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Sentence-level token budget per LM call, under which chunk boundaries are
/// found. Mirrors `transformation-service/app/nlp/processor.py`'s
/// `chunk_text`, generalized to one budget per call since this worker drives
/// a single combined summarize/sentiment/classify completion per chunk
/// rather than three separate pipelines.
const DEFAULT_CHUNK_TOKEN_BUDGET: usize = 1024;

#[derive(Debug, Deserialize)]
struct TransformationPayload {
    article_id: Uuid,
}

/// Implements `spec.md` §4.6.
#[derive(Clone)]
pub struct TransformationHandler {
    doc_store: Arc<dyn DocStore>,
    llm: Arc<dyn LlmClient>,
    vector_index: Arc<dyn VectorIndex>,
    chunk_token_budget: usize,
}

impl TransformationHandler {
    #[must_use]
    pub fn new(doc_store: Arc<dyn DocStore>, llm: Arc<dyn LlmClient>, vector_index: Arc<dyn VectorIndex>) -> Self {
        Self {
            doc_store,
            llm,
            vector_index,
            chunk_token_budget: DEFAULT_CHUNK_TOKEN_BUDGET,
        }
    }

    #[must_use]
    pub fn with_chunk_token_budget(mut self, budget: usize) -> Self {
        self.chunk_token_budget = budget.max(1);
        self
    }
}

#[async_trait]
impl TaskHandler for TransformationHandler {
    fn stage_name(&self) -> &str {
        "transformation"
    }

    async fn execute(&self, payload: Value) -> Result<Value, NewsflowError> {
        let payload: TransformationPayload = serde_json::from_value(payload).map_err(|e| NewsflowError::BadInput {
            message: format!("malformed transformation payload: {e}"),
        })?;

        let text = self.doc_store.fetch_text(payload.article_id).await?;
        if text.trim().is_empty() {
            return Err(NewsflowError::BadInput {
                message: format!("article {} has no content to summarize", payload.article_id),
            });
        }

        let chunks = chunk_text(&text, self.chunk_token_budget);
        let mut enrichments = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            enrichments.push(self.llm.summarize_sentiment_classify(chunk).await?);
        }
        let combined = combine_enrichments(enrichments);

        self.doc_store.update_enrichment(payload.article_id, &combined).await?;
        self.vector_index.reindex(payload.article_id, &text).await?;

        Ok(json!({
            "summary": combined.summary,
            "sentiment": combined.sentiment,
            "classification": combined.classification,
        }))
    }
}

/// Splits `text` on sentence boundaries (". ") into chunks whose
/// whitespace-delimited word count stays under `token_budget`, using word
/// count as a cheap token-count proxy (the original tokenizes per-model;
/// this worker has no model-specific tokenizer available at this layer).
fn chunk_text(text: &str, token_budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in text.split(". ") {
        let candidate = if current.is_empty() {
            format!("{sentence}. ")
        } else {
            format!("{current}{sentence}. ")
        };
        if candidate.split_whitespace().count() > token_budget && !current.is_empty() {
            chunks.push(current.trim().to_string());
            current = format!("{sentence}. ");
        } else {
            current = candidate;
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

/// Aggregates per-chunk enrichments: summaries are joined, sentiment and
/// classification take the most common vote across chunks (mirrors
/// `analyze_sentiment`'s majority-vote aggregation).
fn combine_enrichments(enrichments: Vec<Enrichment>) -> Enrichment {
    let summary = enrichments.iter().map(|e| e.summary.as_str()).collect::<Vec<_>>().join(" ");
    let sentiment = majority(enrichments.iter().map(|e| e.sentiment.as_str()));
    let classification = majority(enrichments.iter().map(|e| e.classification.as_str()));
    Enrichment { summary, sentiment, classification }
}

fn majority<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values {
        if let Some(entry) = counts.iter_mut().find(|(v, _)| *v == value) {
            entry.1 += 1;
        } else {
            counts.push((value, 1));
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(value, _)| value.to_string())
        .unwrap_or_else(|| "neutral".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_produces_one_chunk() {
        let chunks = chunk_text("A short article. With two sentences.", 1024);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn long_text_splits_on_sentence_boundaries_under_budget() {
        let sentence = "word ".repeat(20);
        let text = vec![sentence; 10].join(". ");
        let chunks = chunk_text(&text, 50);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.split_whitespace().count() <= 50 + 20);
        }
    }

    #[test]
    fn majority_vote_picks_the_most_common_label() {
        let label = majority(["negative", "positive", "positive"].into_iter());
        assert_eq!(label, "positive");
    }
}
