//! PubMed retrieval over the NCBI E-utilities API.
//!
//! Three requests per call: `esearch` resolves the query to PubMed ids,
//! `esummary` fetches title, journal and date for each id, and `efetch`
//! (`rettype=abstract`) brings the abstract text the evidence is built from.

use async_trait::async_trait;
use scribeloop_core::error::CapabilityError;
use scribeloop_core::tool::{Capability, CapabilityKind, ToolOutput};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::eutils::{EUtils, build_query};
use crate::{preview, string_list, xml};

/// Section heading for literature evidence.
pub(crate) const TOPIC: &str = "Published research";

pub struct PubMedTool {
    eutils: EUtils,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PubMedDoc {
    pub pmid: String,
    pub title: String,
    pub journal: String,
    pub pub_date: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract", skip_serializing_if = "String::is_empty")]
    pub abstract_text: String,
}

impl PubMedDoc {
    pub fn url(&self) -> String {
        format!("https://pubmed.ncbi.nlm.nih.gov/{}/", self.pmid)
    }
}

impl PubMedTool {
    pub fn new(eutils: EUtils) -> Self {
        Self { eutils }
    }
}

/// Documents in the order of `ids`; ids missing from the summary are skipped.
pub fn parse_summaries(body: &serde_json::Value, ids: &[String]) -> Vec<PubMedDoc> {
    let result = &body["result"];
    ids.iter()
        .filter_map(|id| {
            let entry = result.get(id)?;
            let title = entry["title"].as_str()?.trim().to_string();
            Some(PubMedDoc {
                pmid: id.clone(),
                title,
                journal: entry["fulljournalname"]
                    .as_str()
                    .or_else(|| entry["source"].as_str())
                    .unwrap_or_default()
                    .to_string(),
                pub_date: entry["pubdate"].as_str().unwrap_or_default().to_string(),
                authors: entry["authors"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|x| x["name"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
                abstract_text: String::new(),
            })
        })
        .collect()
}

/// Abstract text per PMID from an `efetch` PubmedArticleSet.
pub fn parse_abstracts(xml: &str) -> Result<HashMap<String, String>, CapabilityError> {
    const PMID: &str = "MedlineCitation/PMID";
    const ABSTRACT: &str = "Abstract/AbstractText";

    let records = xml::records(xml, "PubmedArticle", &[PMID, ABSTRACT])?;
    Ok(records
        .into_iter()
        .filter_map(|mut rec| {
            let pmid = rec.get(PMID)?.first()?.clone();
            let text = rec.remove(ABSTRACT)?.join(" ");
            Some((pmid, text))
        })
        .collect())
}

pub fn render(docs: &[PubMedDoc]) -> String {
    let mut out = String::new();
    for doc in docs {
        out.push_str(&format!("Title: {}\n", doc.title));
        if !doc.authors.is_empty() {
            out.push_str(&format!("Authors: {}\n", doc.authors.join(", ")));
        }
        out.push_str(&format!(
            "Journal: {} ({})\nSource: {}\n",
            doc.journal,
            doc.pub_date,
            doc.url()
        ));
        if !doc.abstract_text.is_empty() {
            out.push_str(&format!("Content: {}\n", preview(&doc.abstract_text)));
        }
        out.push('\n');
    }
    out
}

#[async_trait]
impl Capability for PubMedTool {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Retrieval
    }

    fn description(&self) -> &str {
        "Search PubMed for biomedical literature. Returns titles, journals, links and abstracts."
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, CapabilityError> {
        let topic = arguments["topic"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| CapabilityError::InvalidArguments("Missing 'topic' argument".into()))?;
        let keywords = string_list(&arguments["keywords"]);
        let max_results = arguments["max_results"].as_u64().unwrap_or(5).clamp(1, 100);

        let query = build_query(topic, &keywords);
        debug!(query = %query, max_results, "Searching PubMed");

        let ids = self.eutils.search("pubmed", &query, max_results).await?;
        if ids.is_empty() {
            return Err(CapabilityError::Fatal(format!(
                "no PubMed results for '{query}'"
            )));
        }

        let summary = self.eutils.summary("pubmed", &ids).await?;
        let mut docs = parse_summaries(&summary, &ids);
        if docs.is_empty() {
            return Err(CapabilityError::Fatal(
                "esummary returned no usable documents".into(),
            ));
        }

        let abstracts = self
            .eutils
            .fetch("pubmed", &ids, Some("abstract"))
            .await
            .and_then(|xml| parse_abstracts(&xml))?;
        for doc in &mut docs {
            if let Some(text) = abstracts.get(&doc.pmid) {
                doc.abstract_text = text.clone();
            }
        }
        debug!(
            docs = docs.len(),
            with_abstract = docs.iter().filter(|d| !d.abstract_text.is_empty()).count(),
            "PubMed search finished"
        );

        let data = serde_json::to_value(&docs)
            .map_err(|e| CapabilityError::Fatal(format!("cannot encode documents: {e}")))?;
        Ok(ToolOutput::text(render(&docs))
            .with_topic(TOPIC)
            .with_data(data))
    }
}
