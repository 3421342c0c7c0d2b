use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HookError;
use crate::link::Link;

/// One hop of a redirect chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub reason: String,
    pub cookies: HashMap<String, String>,
    pub request: HashMap<String, String>,
    pub response: HashMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub body: Vec<u8>,
}

/// The HTTP response contract the pipeline consumes.
///
/// Site hooks produce one of these from whatever client they drive; the
/// fetcher only ever looks at this shape. Header keys are lowercased.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRecord {
    /// Final URL after following redirects.
    pub url: String,
    pub method: String,
    pub status: u16,
    pub reason: String,
    /// Cookies set by the final response.
    pub cookies: HashMap<String, String>,
    /// Cookies accumulated over the whole session (redirect chain included).
    pub session: HashMap<String, String>,
    /// Request headers as sent.
    pub request: HashMap<String, String>,
    /// Response headers of the final hop.
    pub response: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Intermediate redirect hops, oldest first.
    pub history: Vec<HistoryRecord>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchRecord {
    pub fn ok(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// Media type of the response, lowercased and stripped of parameters.
    pub fn content_type(&self) -> Option<String> {
        self.response
            .get("content-type")
            .map(|value| value.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Crawler,
    Loader,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Crawler => "crawler",
            WorkerRole::Loader => "loader",
        }
    }
}

/// Called after each worker round with the pool just processed.
///
/// Returning [`HookError::Break`] makes the worker finish the round and
/// exit; any other failure is logged and ignored.
pub trait RoundHook: Send + Sync {
    fn on_round(&self, role: WorkerRole, pool: &[Link]) -> Result<(), HookError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: u16, content_type: &str) -> FetchRecord {
        let mut response = HashMap::new();
        response.insert("content-type".to_string(), content_type.to_string());
        FetchRecord {
            url: "http://example.onion/".to_string(),
            method: "GET".to_string(),
            status,
            reason: String::new(),
            cookies: HashMap::new(),
            session: HashMap::new(),
            request: HashMap::new(),
            response,
            body: Vec::new(),
            history: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn ok_covers_success_and_redirects() {
        assert!(record(200, "text/html").ok());
        assert!(record(302, "text/html").ok());
        assert!(!record(404, "text/html").ok());
        assert!(!record(503, "text/html").ok());
    }

    #[test]
    fn content_type_strips_parameters() {
        assert_eq!(
            record(200, "Text/HTML; charset=UTF-8").content_type().as_deref(),
            Some("text/html")
        );
    }
}
