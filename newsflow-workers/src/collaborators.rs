//! ABOUTME: Opaque collaborator traits for each worker's external dependency, plus HTTP-backed impls
//! ABOUTME: Production calls a storage/vector/LM service over HTTP; newsflow-testing's fakes stand in for tests

use async_trait::async_trait;
use chrono::NaiveDate;
use newsflow_core::NewsflowError;
use serde::Deserialize;
use uuid::Uuid;

/// One article found by a source's page-traversal strategy, pre-content-fetch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct ArticleDescriptor {
    pub url: String,
    pub source: String,
    pub published_on: NaiveDate,
}

/// The LM's structured output for one article.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct Enrichment {
    pub summary: String,
    pub sentiment: String,
    pub classification: String,
}

/// The LM's structured output for one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    True,
    False,
    Undetermined,
}

impl Verdict {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::True => "TRUE",
            Self::False => "FALSE",
            Self::Undetermined => "UNDETERMINED",
        }
    }

    #[must_use]
    pub const fn is_undetermined(self) -> bool {
        matches!(self, Self::Undetermined)
    }

    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.to_uppercase().as_str() {
            "TRUE" => Self::True,
            "FALSE" => Self::False,
            _ => Self::Undetermined,
        }
    }
}

/// Walks a source's URL template over a date range and returns article
/// descriptors, then (in production) fetches full content with a
/// requests-first, headless-browser-fallback policy. Production
/// implementations delegate the page-traversal work to a source service;
/// this trait only contracts the result.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn collect(
        &self,
        sources: &[String],
        date_base: NaiveDate,
        date_cutoff: NaiveDate,
    ) -> Result<Vec<ArticleDescriptor>, NewsflowError>;
}

/// The language model: summarize/sentiment/classify an article, or assess a claim.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn summarize_sentiment_classify(&self, text: &str) -> Result<Enrichment, NewsflowError>;
    async fn verify(&self, claim: &str, context: &[String]) -> Result<Verdict, NewsflowError>;
}

/// Article storage: bulk upsert by URL, fetch text by id, record enrichment.
#[async_trait]
pub trait DocStore: Send + Sync {
    async fn upsert_articles(&self, articles: &[ArticleDescriptor]) -> Result<Vec<Uuid>, NewsflowError>;
    async fn fetch_text(&self, article_id: Uuid) -> Result<String, NewsflowError>;
    async fn update_enrichment(&self, article_id: Uuid, enrichment: &Enrichment) -> Result<(), NewsflowError>;
}

/// Semantic index over article/context embeddings: reindex on write, search on read.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn reindex(&self, article_id: Uuid, text: &str) -> Result<(), NewsflowError>;
    async fn hybrid_search(&self, query: &str, limit: usize) -> Result<Vec<String>, NewsflowError>;
}

/// The verification stage's fallback evidence source when the internal
/// index leaves a claim `UNDETERMINED`, matching the original's
/// `duckduckgo_search_tool` agent tool (`verification-service/app/core/verifier.py`).
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, claim: &str) -> Result<Vec<String>, NewsflowError>;
}

fn upstream_error(context: &str, source: reqwest::Error) -> NewsflowError {
    NewsflowError::TransientUpstream {
        message: format!("{context}: {source}"),
    }
}

/// Calls a source service's per-source article listing endpoint, mirroring
/// `extraction-service/app/utils/services.py`'s `get_sources`/bulk-post
/// round trip against the storage service.
pub struct HttpScraper {
    client: reqwest::Client,
    source_service_url: String,
}

impl HttpScraper {
    #[must_use]
    pub fn new(client: reqwest::Client, source_service_url: impl Into<String>) -> Self {
        Self {
            client,
            source_service_url: source_service_url.into(),
        }
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn collect(
        &self,
        sources: &[String],
        date_base: NaiveDate,
        date_cutoff: NaiveDate,
    ) -> Result<Vec<ArticleDescriptor>, NewsflowError> {
        let mut descriptors = Vec::new();
        for source in sources {
            let url = format!("{}/sources/{source}/articles", self.source_service_url);
            let response = self
                .client
                .get(&url)
                .query(&[("date_base", date_base.to_string()), ("date_cutoff", date_cutoff.to_string())])
                .send()
                .await
                .map_err(|e| upstream_error("source service request failed", e))?;
            if response.status().as_u16() == 404 {
                return Err(NewsflowError::BadInput {
                    message: format!("unknown source '{source}'"),
                });
            }
            if !response.status().is_success() {
                return Err(NewsflowError::TransientUpstream {
                    message: format!("source service returned {} for '{source}'", response.status()),
                });
            }
            let mut page: Vec<ArticleDescriptor> =
                response.json().await.map_err(|e| upstream_error("source service response decode failed", e))?;
            descriptors.append(&mut page);
        }
        Ok(descriptors)
    }
}

/// OpenAI-compatible chat-completion client, matching the original's
/// Ollama/`OpenAIModel`-via-`pydantic_ai` wiring (`verification-service/app/core/verifier.py`)
/// generalized to also drive transformation's summarize/sentiment/classify call.
pub struct HttpLlmClient {
    client: reqwest::Client,
    llm_url: String,
    model: String,
}

impl HttpLlmClient {
    #[must_use]
    pub fn new(client: reqwest::Client, llm_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            llm_url: llm_url.into(),
            model: model.into(),
        }
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, NewsflowError> {
        #[derive(serde::Serialize)]
        struct ChatMessage<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }
        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: String,
        }
        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.llm_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| upstream_error("llm request failed", e))?;
        if !response.status().is_success() {
            return Err(NewsflowError::TransientUpstream {
                message: format!("llm service returned {}", response.status()),
            });
        }
        let parsed: ChatResponse = response.json().await.map_err(|e| upstream_error("llm response decode failed", e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| NewsflowError::TransientUpstream {
                message: "llm response had no choices".to_string(),
            })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn summarize_sentiment_classify(&self, text: &str) -> Result<Enrichment, NewsflowError> {
        let raw = self
            .complete(
                "Summarize the article in two sentences, then on separate lines report \
                 sentiment (positive/negative/neutral) and a one-word topic classification. \
                 Respond as `summary: ...`, `sentiment: ...`, `classification: ...`, one per line.",
                text,
            )
            .await?;
        Ok(parse_enrichment(&raw))
    }

    async fn verify(&self, claim: &str, context: &[String]) -> Result<Verdict, NewsflowError> {
        if context.is_empty() {
            return Ok(Verdict::Undetermined);
        }
        let prompt = format!(
            "Claim: {claim}\n\nContext:\n{}\n\nIs the claim True, False, or Undetermined? \
             Reply with a single word.",
            context.join("\n\n")
        );
        let raw = self.complete("You are a fact-checking assistant.", &prompt).await?;
        Ok(Verdict::parse(raw.trim()))
    }
}

fn parse_enrichment(raw: &str) -> Enrichment {
    let mut summary = String::new();
    let mut sentiment = "neutral".to_string();
    let mut classification = "general".to_string();
    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("summary:") {
            summary = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("sentiment:") {
            sentiment = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("classification:") {
            classification = value.trim().to_string();
        }
    }
    if summary.is_empty() {
        summary = raw.chars().take(280).collect();
    }
    Enrichment { summary, sentiment, classification }
}

/// Storage-service-backed `DocStore`, matching `storage-service/app/main.py`'s
/// `POST /articles/bulk`, `GET /articles/{id}`, `PUT /articles/{id}` routes.
pub struct HttpDocStore {
    client: reqwest::Client,
    doc_store_url: String,
}

impl HttpDocStore {
    #[must_use]
    pub fn new(client: reqwest::Client, doc_store_url: impl Into<String>) -> Self {
        Self {
            client,
            doc_store_url: doc_store_url.into(),
        }
    }
}

#[async_trait]
impl DocStore for HttpDocStore {
    async fn upsert_articles(&self, articles: &[ArticleDescriptor]) -> Result<Vec<Uuid>, NewsflowError> {
        #[derive(Deserialize)]
        struct Inserted {
            id: Uuid,
        }
        let response = self
            .client
            .post(format!("{}/articles/bulk", self.doc_store_url))
            .json(articles)
            .send()
            .await
            .map_err(|e| upstream_error("doc store bulk upsert failed", e))?;
        if !response.status().is_success() {
            return Err(NewsflowError::TransientUpstream {
                message: format!("doc store returned {}", response.status()),
            });
        }
        let inserted: Vec<Inserted> =
            response.json().await.map_err(|e| upstream_error("doc store response decode failed", e))?;
        Ok(inserted.into_iter().map(|i| i.id).collect())
    }

    async fn fetch_text(&self, article_id: Uuid) -> Result<String, NewsflowError> {
        #[derive(Deserialize)]
        struct Article {
            content: String,
        }
        let response = self
            .client
            .get(format!("{}/articles/{article_id}", self.doc_store_url))
            .send()
            .await
            .map_err(|e| upstream_error("doc store fetch failed", e))?;
        if response.status().as_u16() == 404 {
            return Err(NewsflowError::BadInput {
                message: format!("article {article_id} not found"),
            });
        }
        if !response.status().is_success() {
            return Err(NewsflowError::TransientUpstream {
                message: format!("doc store returned {}", response.status()),
            });
        }
        let article: Article = response.json().await.map_err(|e| upstream_error("doc store response decode failed", e))?;
        Ok(article.content)
    }

    async fn update_enrichment(&self, article_id: Uuid, enrichment: &Enrichment) -> Result<(), NewsflowError> {
        let response = self
            .client
            .put(format!("{}/articles/{article_id}", self.doc_store_url))
            .json(enrichment)
            .send()
            .await
            .map_err(|e| upstream_error("doc store update failed", e))?;
        if !response.status().is_success() {
            return Err(NewsflowError::TransientUpstream {
                message: format!("doc store returned {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Vector-store-backed `VectorIndex`, matching `storage-service/app/main.py`'s
/// `GET /search/` endpoint generalized to a reindex/search pair.
pub struct HttpVectorIndex {
    client: reqwest::Client,
    vector_store_url: String,
}

impl HttpVectorIndex {
    #[must_use]
    pub fn new(client: reqwest::Client, vector_store_url: impl Into<String>) -> Self {
        Self {
            client,
            vector_store_url: vector_store_url.into(),
        }
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn reindex(&self, article_id: Uuid, text: &str) -> Result<(), NewsflowError> {
        #[derive(serde::Serialize)]
        struct ReindexRequest<'a> {
            article_id: Uuid,
            text: &'a str,
        }
        let response = self
            .client
            .post(format!("{}/index", self.vector_store_url))
            .json(&ReindexRequest { article_id, text })
            .send()
            .await
            .map_err(|e| upstream_error("vector index reindex failed", e))?;
        if !response.status().is_success() {
            return Err(NewsflowError::TransientUpstream {
                message: format!("vector index returned {}", response.status()),
            });
        }
        Ok(())
    }

    async fn hybrid_search(&self, query: &str, limit: usize) -> Result<Vec<String>, NewsflowError> {
        let response = self
            .client
            .get(format!("{}/search/", self.vector_store_url))
            .query(&[("q", query), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|e| upstream_error("vector index search failed", e))?;
        if !response.status().is_success() {
            return Err(NewsflowError::TransientUpstream {
                message: format!("vector index returned {}", response.status()),
            });
        }
        response.json().await.map_err(|e| upstream_error("vector index response decode failed", e))
    }
}

/// Web-search-backed fallback evidence source, matching the original's
/// `duckduckgo_search_tool` agent tool generalized to a plain search
/// endpoint returning ranked snippets.
pub struct HttpWebSearch {
    client: reqwest::Client,
    web_search_url: String,
}

impl HttpWebSearch {
    #[must_use]
    pub fn new(client: reqwest::Client, web_search_url: impl Into<String>) -> Self {
        Self {
            client,
            web_search_url: web_search_url.into(),
        }
    }
}

#[async_trait]
impl WebSearch for HttpWebSearch {
    async fn search(&self, claim: &str) -> Result<Vec<String>, NewsflowError> {
        let response = self
            .client
            .get(format!("{}/search", self.web_search_url))
            .query(&[("q", claim)])
            .send()
            .await
            .map_err(|e| upstream_error("web search request failed", e))?;
        if !response.status().is_success() {
            return Err(NewsflowError::TransientUpstream {
                message: format!("web search returned {}", response.status()),
            });
        }
        response.json().await.map_err(|e| upstream_error("web search response decode failed", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_round_trips_through_its_wire_string() {
        assert_eq!(Verdict::parse("true"), Verdict::True);
        assert_eq!(Verdict::parse("FALSE"), Verdict::False);
        assert_eq!(Verdict::parse("maybe"), Verdict::Undetermined);
        assert_eq!(Verdict::True.as_str(), "TRUE");
    }

    #[test]
    fn enrichment_parses_labelled_lines() {
        let raw = "summary: a calm day\nsentiment: positive\nclassification: weather\n";
        let enrichment = parse_enrichment(raw);
        assert_eq!(enrichment.summary, "a calm day");
        assert_eq!(enrichment.sentiment, "positive");
        assert_eq!(enrichment.classification, "weather");
    }

    #[test]
    fn enrichment_falls_back_to_raw_text_when_unlabelled() {
        let enrichment = parse_enrichment("just some prose with no labels");
        assert_eq!(enrichment.summary, "just some prose with no labels");
        assert_eq!(enrichment.sentiment, "neutral");
    }
}
