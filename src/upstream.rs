//! Blocking client for the upstream metadata API.
//!
//! The secret key is only attached here, at the moment a request leaves the
//! process; callers deal in bare sub-paths and forwarded query pairs.

use std::time::Duration;

use serde_json::Value;

use crate::config::TmdbConfig;

/// Longest upstream error body kept for logs.
const MAX_LOGGED_BODY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream unreachable: {0}")]
    Transport(String),
    #[error("upstream returned {status}")]
    Status { status: u16, body: String },
    #[error("invalid upstream response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Short description that is safe to hand to a browser.
    pub fn client_reason(&self) -> String {
        match self {
            UpstreamError::Transport(_) => "upstream unreachable".to_string(),
            UpstreamError::Status { status, .. } => format!("upstream returned {status}"),
            UpstreamError::Decode(_) => "invalid upstream response".to_string(),
        }
    }
}

/// Source of metadata JSON. Implementations block; the proxy runs them on the
/// blocking pool.
pub trait MetadataUpstream: Send + Sync + 'static {
    fn fetch(&self, path: &str, query: &[(String, String)]) -> Result<Value, UpstreamError>;
}

pub struct TmdbClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

impl TmdbClient {
    pub fn new(config: &TmdbConfig) -> Self {
        Self::with_timeout(&config.base_url, &config.api_key, config.timeout)
    }

    pub fn with_timeout(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl MetadataUpstream for TmdbClient {
    fn fetch(&self, path: &str, query: &[(String, String)]) -> Result<Value, UpstreamError> {
        let mut request = self
            .agent
            .get(&self.endpoint(path))
            .query("api_key", &self.api_key);
        for (key, value) in query {
            request = request.query(key, value);
        }

        match request.call() {
            Ok(response) => response
                .into_json::<Value>()
                .map_err(|err| UpstreamError::Decode(err.to_string())),
            Err(ureq::Error::Status(status, response)) => {
                let mut body = response.into_string().unwrap_or_default();
                if body.len() > MAX_LOGGED_BODY {
                    let mut cut = MAX_LOGGED_BODY;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                }
                Err(UpstreamError::Status { status, body })
            }
            // The transport error's Display includes the request URL, and with
            // it the key, so only the kind and message are kept.
            Err(ureq::Error::Transport(transport)) => Err(UpstreamError::Transport(
                match transport.message() {
                    Some(message) => format!("{}: {}", transport.kind(), message),
                    None => transport.kind().to_string(),
                },
            )),
        }
    }
}
