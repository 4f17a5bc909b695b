//! PubMed Central full-text retrieval.
//!
//! `esearch` over `db=pmc`, then one `efetch` per article, fetched
//! concurrently. Evidence is built from the body paragraphs; articles without
//! body text (abstract-only deposits) are skipped.

use async_trait::async_trait;
use scribeloop_core::error::CapabilityError;
use scribeloop_core::tool::{Capability, CapabilityKind, ToolOutput};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::eutils::{EUtils, build_query};
use crate::pubmed::TOPIC;
use crate::{preview, string_list, xml};

const TITLE: &str = "title-group/article-title";
const BODY: &str = "body/p";

pub struct PmcTool {
    eutils: EUtils,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PmcDoc {
    pub pmc_id: String,
    pub title: String,
    pub body: String,
}

impl PmcDoc {
    pub fn url(&self) -> String {
        format!("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC{}/", self.pmc_id)
    }
}

impl PmcTool {
    pub fn new(eutils: EUtils) -> Self {
        Self { eutils }
    }

    /// Fetch every id concurrently; results keep the order of `ids`.
    async fn fetch_all(&self, ids: &[String]) -> Result<Vec<PmcDoc>, CapabilityError> {
        let mut fetches = JoinSet::new();
        for (index, id) in ids.iter().enumerate() {
            let eutils = self.eutils.clone();
            let id = id.clone();
            fetches.spawn(async move {
                let result = eutils
                    .fetch("pmc", std::slice::from_ref(&id), None)
                    .await
                    .and_then(|xml| parse_article(&id, &xml));
                (index, id, result)
            });
        }

        let mut docs = Vec::new();
        let mut last_error = None;
        while let Some(joined) = fetches.join_next().await {
            let (index, id, result) = joined
                .map_err(|e| CapabilityError::Fatal(format!("PMC fetch task failed: {e}")))?;
            match result {
                Ok(Some(doc)) => docs.push((index, doc)),
                Ok(None) => debug!(pmc_id = %id, "PMC article has no body text"),
                Err(e) => {
                    warn!(pmc_id = %id, error = %e, "PMC fetch failed");
                    last_error = Some(e);
                }
            }
        }

        if docs.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        docs.sort_by_key(|(index, _)| *index);
        Ok(docs.into_iter().map(|(_, doc)| doc).collect())
    }
}

/// Title and body text of one `efetch` article; `None` without body text.
pub fn parse_article(pmc_id: &str, xml: &str) -> Result<Option<PmcDoc>, CapabilityError> {
    let records = xml::records(xml, "article", &[TITLE, BODY])?;
    let Some(mut rec) = records.into_iter().next() else {
        return Ok(None);
    };
    let body = rec.remove(BODY).unwrap_or_default().join("\n\n");
    if body.is_empty() {
        return Ok(None);
    }
    let title = rec
        .remove(TITLE)
        .and_then(|t| t.into_iter().next())
        .unwrap_or_else(|| "Untitled".to_string());
    Ok(Some(PmcDoc {
        pmc_id: pmc_id.to_string(),
        title,
        body,
    }))
}

pub fn render(docs: &[PmcDoc]) -> String {
    let mut out = String::new();
    for doc in docs {
        out.push_str(&format!(
            "Title: {}\nSource: {}\nContent: {}\n\n",
            doc.title,
            doc.url(),
            preview(&doc.body)
        ));
    }
    out
}

#[async_trait]
impl Capability for PmcTool {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Retrieval
    }

    fn description(&self) -> &str {
        "Search PubMed Central for open-access full-text articles. Returns body text previews."
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, CapabilityError> {
        let topic = arguments["topic"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| CapabilityError::InvalidArguments("Missing 'topic' argument".into()))?;
        let keywords = string_list(&arguments["keywords"]);
        let max_results = arguments["max_results"].as_u64().unwrap_or(5).clamp(1, 20);

        let query = build_query(topic, &keywords);
        debug!(query = %query, max_results, "Searching PMC");

        let ids = self.eutils.search("pmc", &query, max_results).await?;
        if ids.is_empty() {
            return Err(CapabilityError::Fatal(format!("no PMC results for '{query}'")));
        }

        let docs = self.fetch_all(&ids).await?;
        if docs.is_empty() {
            return Err(CapabilityError::Fatal(format!(
                "no PMC full text for '{query}'"
            )));
        }

        let data = serde_json::to_value(&docs)
            .map_err(|e| CapabilityError::Fatal(format!("cannot encode documents: {e}")))?;
        Ok(ToolOutput::text(render(&docs))
            .with_topic(TOPIC)
            .with_data(data))
    }
}
