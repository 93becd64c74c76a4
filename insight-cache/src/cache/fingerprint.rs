//! Deterministic cache keys
//!
//! A fingerprint depends only on the normalized query text, the routing
//! strategy name and the optional research topic, so the same logical
//! request maps to the same key across process restarts.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::cache::types::CacheKey;

/// Kind of payload a key addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// A routed model answer
    Answer,

    /// Retrieved research documents
    Research,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Answer => write!(f, "answer"),
            PayloadKind::Research => write!(f, "research"),
        }
    }
}

/// Lowercase, trim and collapse internal whitespace
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cache key builder
pub struct Fingerprint {
    kind: PayloadKind,
    client: Option<String>,
    query: String,
    strategy: Option<String>,
    topic: Option<String>,
}

impl Fingerprint {
    pub fn new(kind: PayloadKind) -> Self {
        Self {
            kind,
            client: None,
            query: String::new(),
            strategy: None,
            topic: None,
        }
    }

    /// Query text; normalized before hashing
    pub fn query(mut self, query: &str) -> Self {
        self.query = normalize_query(query);
        self
    }

    /// Name of the routing strategy that was requested
    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Research topic attached to the request
    pub fn topic(mut self, topic: Option<&str>) -> Self {
        self.topic = topic.map(normalize_query).filter(|t| !t.is_empty());
        self
    }

    /// Tenant prefix for multi-client deployments
    pub fn client(mut self, client: Option<&str>) -> Self {
        self.client = client.map(str::to_string);
        self
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        let content = [
            self.query.as_str(),
            self.strategy.as_deref().unwrap_or(""),
            self.topic.as_deref().unwrap_or(""),
        ]
        .join("::");
        let digest = format!("{:x}", Sha256::digest(content.as_bytes()));
        let hash = &digest[..32];

        match self.client {
            Some(client) => format!("client:{}:{}:{}", client, self.kind, hash),
            None => format!("{}:{}", self.kind, hash),
        }
    }
}
