//! NCBI E-utilities client shared by the PubMed and PMC capabilities.
//!
//! `esearch` and `esummary` answer in JSON; `efetch` answers in XML and is
//! returned as raw text for [`crate::xml`] to pick apart.

use scribeloop_core::error::CapabilityError;
use tracing::warn;

use crate::classify_status;

#[derive(Clone)]
pub struct EUtils {
    base_url: String,
    api_key: Option<String>,
    email: Option<String>,
    client: reqwest::Client,
}

impl EUtils {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            email: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    fn params(&self, db: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", db.to_string())];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        params
    }

    /// Ids matching `term`, best first.
    pub async fn search(
        &self,
        db: &str,
        term: &str,
        retmax: u64,
    ) -> Result<Vec<String>, CapabilityError> {
        let mut params = self.params(db);
        params.push(("term", term.to_string()));
        params.push(("retmax", retmax.to_string()));
        params.push(("retmode", "json".to_string()));
        let body: serde_json::Value = self
            .get("esearch.fcgi", params)
            .await?
            .json()
            .await
            .map_err(|e| CapabilityError::Fatal(format!("esearch: malformed response: {e}")))?;
        parse_search_ids(&body)
    }

    pub async fn summary(
        &self,
        db: &str,
        ids: &[String],
    ) -> Result<serde_json::Value, CapabilityError> {
        let mut params = self.params(db);
        params.push(("id", ids.join(",")));
        params.push(("retmode", "json".to_string()));
        self.get("esummary.fcgi", params)
            .await?
            .json()
            .await
            .map_err(|e| CapabilityError::Fatal(format!("esummary: malformed response: {e}")))
    }

    /// Raw XML for `ids`. `rettype` narrows the record, e.g. `abstract`.
    pub async fn fetch(
        &self,
        db: &str,
        ids: &[String],
        rettype: Option<&str>,
    ) -> Result<String, CapabilityError> {
        let mut params = self.params(db);
        params.push(("id", ids.join(",")));
        params.push(("retmode", "xml".to_string()));
        if let Some(rettype) = rettype {
            params.push(("rettype", rettype.to_string()));
        }
        self.get("efetch.fcgi", params)
            .await?
            .text()
            .await
            .map_err(|e| CapabilityError::Transient(format!("efetch: {e}")))
    }

    async fn get(
        &self,
        endpoint: &str,
        params: Vec<(&'static str, String)>,
    ) -> Result<reqwest::Response, CapabilityError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| CapabilityError::Transient(format!("{endpoint}: {e}")))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, endpoint, "E-utilities returned error");
            return Err(classify_status(status, &body));
        }
        Ok(response)
    }
}

/// `topic AND kw1 AND kw2`
pub fn build_query(topic: &str, keywords: &[String]) -> String {
    std::iter::once(topic.trim())
        .chain(keywords.iter().map(|k| k.trim()))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub fn parse_search_ids(body: &serde_json::Value) -> Result<Vec<String>, CapabilityError> {
    let list = body["esearchresult"]["idlist"]
        .as_array()
        .ok_or_else(|| CapabilityError::Fatal("esearch response has no idlist".into()))?;
    Ok(list
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn query_joins_keywords() {
        let q = build_query("CRISPR", &["maize".into(), " ".into(), "drought".into()]);
        assert_eq!(q, "CRISPR AND maize AND drought");
    }

    #[test]
    fn parse_ids() {
        let body = json!({"esearchresult": {"count": "2", "idlist": ["111", "222"]}});
        assert_eq!(parse_search_ids(&body).unwrap(), vec!["111", "222"]);
        assert!(parse_search_ids(&json!({})).is_err());
    }

    #[tokio::test]
    async fn credentials_ride_along_on_every_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .and(query_param("db", "pmc"))
            .and(query_param("term", "CRISPR"))
            .and(query_param("api_key", "ncbi-key"))
            .and(query_param("email", "me@example.org"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"esearchresult": {"idlist": ["7"]}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let eutils = EUtils::new(format!("{}/", server.uri()))
            .with_api_key(Some("ncbi-key".into()))
            .with_email(Some("me@example.org".into()));
        assert_eq!(eutils.search("pmc", "CRISPR", 3).await.unwrap(), vec!["7"]);
    }

    #[tokio::test]
    async fn malformed_json_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = EUtils::new(server.uri())
            .search("pubmed", "CRISPR", 3)
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Fatal(_)));
    }
}
