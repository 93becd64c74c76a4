//! arXiv export API provider (Atom feed)

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use reqwest::StatusCode;

use super::semantic_scholar::retry_after;
use super::{Paper, ProviderError, ResearchProvider};

pub const PROVIDER_ID: &str = "arxiv";

const BASE_URL: &str = "http://export.arxiv.org/api/query";

pub struct Arxiv {
    client: reqwest::Client,
    base_url: String,
}

impl Default for Arxiv {
    fn default() -> Self {
        Self::new()
    }
}

impl Arxiv {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Clone, Copy)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    url: String,
}

impl EntryBuilder {
    fn push(&mut self, field: Field, text: &str) {
        match field {
            Field::Id => self.id.push_str(text),
            Field::Title => self.title.push_str(text),
            Field::Summary => self.summary.push_str(text),
            Field::Published => self.published.push_str(text),
            Field::AuthorName => match self.authors.last_mut() {
                Some(last) => last.push_str(text),
                None => self.authors.push(text.to_string()),
            },
        }
    }

    fn link(&mut self, e: &BytesStart<'_>) {
        let attr = |name: &str| {
            e.try_get_attribute(name)
                .ok()
                .flatten()
                .and_then(|a| a.unescape_value().ok())
                .map(|v| v.into_owned())
        };
        let is_alternate = attr("rel").map_or(true, |rel| rel == "alternate");
        if let (true, Some(href)) = (is_alternate, attr("href")) {
            if self.url.is_empty() {
                self.url = href;
            }
        }
    }

    fn build(self) -> Paper {
        let paper_id = self
            .id
            .rsplit("/abs/")
            .next()
            .unwrap_or(&self.id)
            .to_string();
        let year = self.published.get(..4).and_then(|y| y.parse().ok());
        let url = if self.url.is_empty() { self.id.clone() } else { self.url };

        Paper {
            paper_id,
            title: collapse_whitespace(&self.title),
            authors: self
                .authors
                .iter()
                .map(|a| collapse_whitespace(a))
                .filter(|a| !a.is_empty())
                .collect(),
            year,
            abstract_text: collapse_whitespace(&self.summary),
            citation_count: 0,
            venue: "arXiv".to_string(),
            url,
            source: "arXiv".to_string(),
            citation: String::new(),
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse the entries of an arXiv Atom feed
pub fn parse_feed(xml: &str) -> Result<Vec<Paper>, ProviderError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut papers = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if entry.is_none() {
                    if e.local_name().as_ref() == b"entry" {
                        entry = Some(EntryBuilder::default());
                    }
                    continue;
                }
                let Some(current) = entry.as_mut() else {
                    continue;
                };
                field = match e.local_name().as_ref() {
                    b"id" => Some(Field::Id),
                    b"title" => Some(Field::Title),
                    b"summary" => Some(Field::Summary),
                    b"published" => Some(Field::Published),
                    b"author" => {
                        current.authors.push(String::new());
                        None
                    }
                    b"name" => Some(Field::AuthorName),
                    b"link" => {
                        current.link(&e);
                        None
                    }
                    _ => None,
                };
            }
            Ok(Event::Empty(e)) => {
                if let Some(current) = entry.as_mut() {
                    if e.local_name().as_ref() == b"link" {
                        current.link(&e);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(current), Some(f)) = (entry.as_mut(), field) {
                    let text = t
                        .unescape()
                        .map_err(|e| ProviderError::Failed(format!("invalid arXiv feed: {}", e)))?;
                    current.push(f, &text);
                }
            }
            Ok(Event::End(e)) => {
                field = None;
                if e.local_name().as_ref() == b"entry" {
                    if let Some(done) = entry.take() {
                        papers.push(done.build());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ProviderError::Failed(format!("invalid arXiv feed: {}", e))),
            _ => {}
        }
    }

    Ok(papers)
}

#[async_trait]
impl ResearchProvider for Arxiv {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn search(&self, topic: &str, limit: usize) -> Result<Vec<Paper>, ProviderError> {
        let search_query = format!("all:{}", topic);
        let limit = limit.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("search_query", search_query.as_str()),
                ("start", "0"),
                ("max_results", limit.as_str()),
                ("sortBy", "relevance"),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Failed(e.to_string()))?;

        // arXiv signals throttling with 503 + Retry-After as well as 429.
        let status = response.status();
        let throttled = status == StatusCode::TOO_MANY_REQUESTS
            || (status == StatusCode::SERVICE_UNAVAILABLE && response.headers().contains_key(reqwest::header::RETRY_AFTER));
        if throttled {
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
        parse_feed(&body)
    }
}
