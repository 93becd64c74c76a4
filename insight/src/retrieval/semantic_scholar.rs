//! Semantic Scholar graph API provider

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use super::{Paper, ProviderError, ResearchProvider};

pub const PROVIDER_ID: &str = "semantic_scholar";

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const FIELDS: &str = "paperId,title,abstract,year,authors,citationCount,venue,url";

pub struct SemanticScholar {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<ApiPaper>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPaper {
    #[serde(default)]
    paper_id: String,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    year: Option<i32>,
    #[serde(default)]
    authors: Vec<ApiAuthor>,
    citation_count: Option<u64>,
    venue: Option<String>,
    url: Option<String>,
}

#[derive(Deserialize)]
struct ApiAuthor {
    name: Option<String>,
}

impl From<ApiPaper> for Paper {
    fn from(p: ApiPaper) -> Self {
        Paper {
            paper_id: p.paper_id,
            title: p.title.unwrap_or_default(),
            authors: p.authors.into_iter().filter_map(|a| a.name).collect(),
            year: p.year,
            abstract_text: p.abstract_text.unwrap_or_default(),
            citation_count: p.citation_count.unwrap_or(0),
            venue: p.venue.unwrap_or_default(),
            url: p.url.unwrap_or_default(),
            source: "Semantic Scholar".to_string(),
            citation: String::new(),
        }
    }
}

impl SemanticScholar {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
            api_key,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Seconds from a `Retry-After` header, if present and numeric
pub(crate) fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub(crate) fn parse_search(body: &str) -> Result<Vec<Paper>, ProviderError> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Failed(format!("invalid Semantic Scholar response: {}", e)))?;
    Ok(response.data.into_iter().map(Paper::from).collect())
}

#[async_trait]
impl ResearchProvider for SemanticScholar {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn search(&self, topic: &str, limit: usize) -> Result<Vec<Paper>, ProviderError> {
        let limit = limit.to_string();
        let mut request = self
            .client
            .get(format!("{}/paper/search", self.base_url))
            .query(&[("query", topic), ("limit", limit.as_str()), ("fields", FIELDS)]);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Failed(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after: retry_after(response.headers()),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Failed(format!("HTTP {}", status.as_u16())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Failed(e.to_string()))?;
        parse_search(&body)
    }
}
