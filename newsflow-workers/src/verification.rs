//! ABOUTME: Verification stage: assemble up to N context snippets and ask the LM to judge a claim
//! ABOUTME: Output contract: {"claim", "verdict", "evidence", "web_search_performed"}

use crate::collaborators::{LlmClient, VectorIndex, WebSearch};
use async_trait::async_trait;
use newsflow_core::NewsflowError;
use newsflow_worker::TaskHandler;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Matches `core/verifier.py`'s fixed-size context window.
const DEFAULT_CONTEXT_SNIPPETS: usize = 5;

#[derive(Debug, Deserialize)]
struct VerificationPayload {
    claim: String,
    #[serde(default)]
    web_search: bool,
}

/// Implements `spec.md` §4.7, including the web-search reassessment
/// mirrored from `verifier.py`'s `ClaimVerifier.verify`: when the
/// index-backed verdict comes back `UNDETERMINED` and the caller opted
/// in, a second LM call is made against web-search evidence instead.
#[derive(Clone)]
pub struct VerificationHandler {
    vector_index: Arc<dyn VectorIndex>,
    llm: Arc<dyn LlmClient>,
    web_search: Arc<dyn WebSearch>,
    context_snippets: usize,
}

impl VerificationHandler {
    #[must_use]
    pub fn new(vector_index: Arc<dyn VectorIndex>, llm: Arc<dyn LlmClient>, web_search: Arc<dyn WebSearch>) -> Self {
        Self {
            vector_index,
            llm,
            web_search,
            context_snippets: DEFAULT_CONTEXT_SNIPPETS,
        }
    }

    #[must_use]
    pub fn with_context_snippets(mut self, count: usize) -> Self {
        self.context_snippets = count.max(1);
        self
    }
}

#[async_trait]
impl TaskHandler for VerificationHandler {
    fn stage_name(&self) -> &str {
        "verification"
    }

    async fn execute(&self, payload: Value) -> Result<Value, NewsflowError> {
        let payload: VerificationPayload = serde_json::from_value(payload).map_err(|e| NewsflowError::BadInput {
            message: format!("malformed verification payload: {e}"),
        })?;

        if payload.claim.trim().is_empty() {
            return Err(NewsflowError::BadInput {
                message: "claim must not be empty".to_string(),
            });
        }

        let mut evidence = self.vector_index.hybrid_search(&payload.claim, self.context_snippets).await?;
        let mut verdict = self.llm.verify(&payload.claim, &evidence).await?;
        let mut web_search_performed = false;

        if verdict.is_undetermined() && payload.web_search {
            info!(claim = %payload.claim, "verdict undetermined, performing web search for additional evidence");
            match self.web_search.search(&payload.claim).await {
                Ok(web_evidence) if !web_evidence.is_empty() => {
                    let reassessed = self.llm.verify(&payload.claim, &web_evidence).await?;
                    evidence = web_evidence;
                    verdict = reassessed;
                    web_search_performed = true;
                }
                Ok(_) => {
                    // No web evidence found; keep the index-backed UNDETERMINED verdict.
                }
                Err(err) => {
                    warn!(%err, claim = %payload.claim, "web search failed, keeping index-backed verdict");
                }
            }
        }

        Ok(json!({
            "claim": payload.claim,
            "verdict": verdict.as_str(),
            "evidence": evidence,
            "web_search_performed": web_search_performed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Verdict;
    use async_trait::async_trait;

    struct EmptyVectorIndex;
    #[async_trait]
    impl VectorIndex for EmptyVectorIndex {
        async fn reindex(&self, _article_id: uuid::Uuid, _text: &str) -> Result<(), NewsflowError> {
            Ok(())
        }
        async fn hybrid_search(&self, _query: &str, _limit: usize) -> Result<Vec<String>, NewsflowError> {
            Ok(vec![])
        }
    }

    struct StubLlm;
    #[async_trait]
    impl LlmClient for StubLlm {
        async fn summarize_sentiment_classify(&self, _text: &str) -> Result<crate::collaborators::Enrichment, NewsflowError> {
            unreachable!()
        }
        async fn verify(&self, _claim: &str, context: &[String]) -> Result<Verdict, NewsflowError> {
            Ok(if context.is_empty() { Verdict::Undetermined } else { Verdict::True })
        }
    }

    struct NoWebSearch;
    #[async_trait]
    impl WebSearch for NoWebSearch {
        async fn search(&self, _claim: &str) -> Result<Vec<String>, NewsflowError> {
            Ok(vec![])
        }
    }

    struct StubWebSearch;
    #[async_trait]
    impl WebSearch for StubWebSearch {
        async fn search(&self, _claim: &str) -> Result<Vec<String>, NewsflowError> {
            Ok(vec!["web snippet".to_string()])
        }
    }

    fn handler(web_search: Arc<dyn WebSearch>) -> VerificationHandler {
        VerificationHandler::new(Arc::new(EmptyVectorIndex), Arc::new(StubLlm), web_search)
    }

    #[tokio::test]
    async fn empty_claim_is_rejected() {
        let err = handler(Arc::new(NoWebSearch)).execute(json!({"claim": "   "})).await.unwrap_err();
        assert_eq!(err.kind(), "BAD_INPUT");
    }

    #[tokio::test]
    async fn no_evidence_yields_undetermined_without_web_search() {
        let result = handler(Arc::new(NoWebSearch))
            .execute(json!({"claim": "the sky is blue", "web_search": false}))
            .await
            .unwrap();
        assert_eq!(result["verdict"], "UNDETERMINED");
        assert_eq!(result["web_search_performed"], false);
        assert_eq!(result["claim"], "the sky is blue");
    }

    #[tokio::test]
    async fn undetermined_verdict_triggers_web_search_reassessment() {
        let result = handler(Arc::new(StubWebSearch))
            .execute(json!({"claim": "the sky is blue", "web_search": true}))
            .await
            .unwrap();
        assert_eq!(result["verdict"], "TRUE");
        assert_eq!(result["web_search_performed"], true);
        assert_eq!(result["evidence"], json!(["web snippet"]));
    }

    #[tokio::test]
    async fn web_search_not_attempted_unless_requested() {
        let result = handler(Arc::new(StubWebSearch))
            .execute(json!({"claim": "the sky is blue", "web_search": false}))
            .await
            .unwrap();
        assert_eq!(result["verdict"], "UNDETERMINED");
        assert_eq!(result["web_search_performed"], false);
    }
}
