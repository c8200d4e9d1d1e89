//! ABOUTME: Extraction stage: validate a date range, collect article descriptors, upsert to the doc store
//! ABOUTME: Output contract: {"article_ids": [...], "article_count": N}

use crate::collaborators::{DocStore, Scraper};
use async_trait::async_trait;
use chrono::NaiveDate;
use newsflow_core::NewsflowError;
use newsflow_worker::TaskHandler;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ExtractionPayload {
    sources: Vec<String>,
    date_base: NaiveDate,
    date_cutoff: NaiveDate,
}

/// Implements `spec.md` §4.5: walk each source over `[date_cutoff, date_base]`,
/// persist the found articles, and report their ids for the next stage's
/// per-item fan-out.
#[derive(Clone)]
pub struct ExtractionHandler {
    scraper: Arc<dyn Scraper>,
    doc_store: Arc<dyn DocStore>,
}

impl ExtractionHandler {
    #[must_use]
    pub fn new(scraper: Arc<dyn Scraper>, doc_store: Arc<dyn DocStore>) -> Self {
        Self { scraper, doc_store }
    }
}

#[async_trait]
impl TaskHandler for ExtractionHandler {
    fn stage_name(&self) -> &str {
        "extraction"
    }

    async fn execute(&self, payload: Value) -> Result<Value, NewsflowError> {
        let payload: ExtractionPayload = serde_json::from_value(payload).map_err(|e| NewsflowError::BadInput {
            message: format!("malformed extraction payload: {e}"),
        })?;

        if payload.sources.is_empty() {
            return Err(NewsflowError::BadInput {
                message: "sources must not be empty".to_string(),
            });
        }

        let (date_base, date_cutoff) = secure_date_range(payload.date_base, payload.date_cutoff)?;

        let descriptors = self.scraper.collect(&payload.sources, date_base, date_cutoff).await?;
        let ids = self.doc_store.upsert_articles(&descriptors).await?;

        Ok(json!({
            "article_ids": ids.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "article_count": ids.len(),
        }))
    }
}

/// Normalizes a caller-provided date range: `date_base` must not precede
/// `date_cutoff`; if they're equal, the cutoff is nudged back one day so the
/// scrape window always covers at least one day (mirrors the original
/// extraction service's `secure_date_range` helper).
fn secure_date_range(date_base: NaiveDate, date_cutoff: NaiveDate) -> Result<(NaiveDate, NaiveDate), NewsflowError> {
    if date_base < date_cutoff {
        return Err(NewsflowError::BadInput {
            message: format!("date_base ({date_base}) must not precede date_cutoff ({date_cutoff})"),
        });
    }
    if date_base == date_cutoff {
        let nudged = date_cutoff.pred_opt().unwrap_or(date_cutoff);
        return Ok((date_base, nudged));
    }
    Ok((date_base, date_cutoff))
}
