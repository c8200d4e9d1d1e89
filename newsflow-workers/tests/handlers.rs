//! ABOUTME: Drives each stage's TaskHandler against local in-memory collaborator fakes
//! ABOUTME: One fake set per test module, kept self-contained so this crate has no test-only dependency

use async_trait::async_trait;
use chrono::NaiveDate;
use newsflow_core::NewsflowError;
use newsflow_worker::TaskHandler;
use newsflow_workers::{ArticleDescriptor, DocStore, Enrichment, ExtractionHandler, LlmClient, Scraper, TransformationHandler, Verdict, VectorIndex, VerificationHandler, WebSearch};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

struct FixedScraper(Vec<ArticleDescriptor>);

#[async_trait]
impl Scraper for FixedScraper {
    async fn collect(&self, _sources: &[String], _date_base: NaiveDate, _date_cutoff: NaiveDate) -> Result<Vec<ArticleDescriptor>, NewsflowError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct InMemoryDocStore {
    by_url: Mutex<HashMap<String, Uuid>>,
    text: Mutex<HashMap<Uuid, String>>,
    enrichment: Mutex<HashMap<Uuid, Enrichment>>,
}

#[async_trait]
impl DocStore for InMemoryDocStore {
    async fn upsert_articles(&self, articles: &[ArticleDescriptor]) -> Result<Vec<Uuid>, NewsflowError> {
        let mut by_url = self.by_url.lock();
        let mut text = self.text.lock();
        let mut ids = Vec::with_capacity(articles.len());
        for article in articles {
            let id = *by_url.entry(article.url.clone()).or_insert_with(Uuid::new_v4);
            text.entry(id).or_insert_with(|| format!("body for {}", article.url));
            ids.push(id);
        }
        Ok(ids)
    }

    async fn fetch_text(&self, article_id: Uuid) -> Result<String, NewsflowError> {
        self.text.lock().get(&article_id).cloned().ok_or_else(|| NewsflowError::BadInput {
            message: format!("unknown article {article_id}"),
        })
    }

    async fn update_enrichment(&self, article_id: Uuid, enrichment: &Enrichment) -> Result<(), NewsflowError> {
        self.enrichment.lock().insert(article_id, enrichment.clone());
        Ok(())
    }
}

struct KeywordLlm;

#[async_trait]
impl LlmClient for KeywordLlm {
    async fn summarize_sentiment_classify(&self, text: &str) -> Result<Enrichment, NewsflowError> {
        let sentiment = if text.to_lowercase().contains("bad") { "negative" } else { "positive" };
        Ok(Enrichment {
            summary: text.chars().take(80).collect(),
            sentiment: sentiment.to_string(),
            classification: "general".to_string(),
        })
    }

    async fn verify(&self, claim: &str, context: &[String]) -> Result<Verdict, NewsflowError> {
        if context.is_empty() {
            return Ok(Verdict::Undetermined);
        }
        let supported = context.iter().any(|c| c.to_lowercase().contains(&claim.to_lowercase()));
        Ok(if supported { Verdict::True } else { Verdict::False })
    }
}

#[derive(Default)]
struct FixedVectorIndex {
    snippets: Vec<String>,
    reindexed: Mutex<Vec<Uuid>>,
}

impl FixedVectorIndex {
    fn new(snippets: Vec<String>) -> Self {
        Self { snippets, reindexed: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl VectorIndex for FixedVectorIndex {
    async fn reindex(&self, article_id: Uuid, _text: &str) -> Result<(), NewsflowError> {
        self.reindexed.lock().push(article_id);
        Ok(())
    }

    async fn hybrid_search(&self, _query: &str, limit: usize) -> Result<Vec<String>, NewsflowError> {
        Ok(self.snippets.iter().take(limit).cloned().collect())
    }
}

struct NoWebSearch;

#[async_trait]
impl WebSearch for NoWebSearch {
    async fn search(&self, _claim: &str) -> Result<Vec<String>, NewsflowError> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn extraction_upserts_collected_descriptors() {
    let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
    let scraper = Arc::new(FixedScraper(vec![ArticleDescriptor {
        url: "https://example.test/a".to_string(),
        source: "example".to_string(),
        published_on: day,
    }]));
    let doc_store = Arc::new(InMemoryDocStore::default());
    let handler = ExtractionHandler::new(scraper, doc_store);

    let result = handler
        .execute(json!({"sources": ["example"], "date_base": "2024-01-05", "date_cutoff": "2024-01-01"}))
        .await
        .unwrap();
    assert_eq!(result["article_count"], 1);
    assert_eq!(result["article_ids"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn extraction_rejects_empty_sources() {
    let scraper = Arc::new(FixedScraper(vec![]));
    let doc_store = Arc::new(InMemoryDocStore::default());
    let handler = ExtractionHandler::new(scraper, doc_store);

    let err = handler
        .execute(json!({"sources": [], "date_base": "2024-01-05", "date_cutoff": "2024-01-01"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "BAD_INPUT");
}

#[tokio::test]
async fn transformation_enriches_fetched_text() {
    let doc_store = Arc::new(InMemoryDocStore::default());
    let article_id = doc_store.upsert_articles(&[ArticleDescriptor {
        url: "https://example.test/a".to_string(),
        source: "example".to_string(),
        published_on: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
    }])
    .await
    .unwrap()[0];
    let vector_index = Arc::new(FixedVectorIndex::new(vec![]));
    let handler = TransformationHandler::new(doc_store, Arc::new(KeywordLlm), vector_index.clone());

    let result = handler.execute(json!({"article_id": article_id})).await.unwrap();
    assert_eq!(result["sentiment"], "positive");
    assert_eq!(*vector_index.reindexed.lock(), vec![article_id]);
}

#[tokio::test]
async fn verification_finds_supporting_evidence() {
    let vector_index = Arc::new(FixedVectorIndex::new(vec!["the claim is well documented".to_string()]));
    let handler = VerificationHandler::new(vector_index, Arc::new(KeywordLlm), Arc::new(NoWebSearch));

    let result = handler.execute(json!({"claim": "the claim", "web_search": false})).await.unwrap();
    assert_eq!(result["verdict"], "TRUE");
}
