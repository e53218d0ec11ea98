//! Playback link resolution over the configured video servers.
//!
//! Server base URLs stay on this side of the API: the registry hands out
//! `{key, name}` pairs and the resolver composes full URLs only for an
//! explicit request. Nothing here touches the network.

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// Media types whose links may carry a season/episode suffix.
const EPISODIC_MEDIA_TYPES: &[&str] = &["tv", "series"];

/// One `SERVER<N>_NAME` / `SERVER<N>_URL` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoServerConfig {
    /// Lowercase identifier handed to clients, e.g. `server1`.
    pub key: String,
    pub name: String,
    pub base_url: String,
}

/// Client-visible projection of a server. Never carries the URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub key: String,
    pub name: String,
}

/// A path segment that clients may send either as a JSON string or number.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawSegment")]
pub struct Segment(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSegment {
    Text(String),
    Number(u64),
}

impl From<RawSegment> for Segment {
    fn from(raw: RawSegment) -> Self {
        match raw {
            RawSegment::Text(text) => Segment(text.trim().to_string()),
            RawSegment::Number(number) => Segment(number.to_string()),
        }
    }
}

impl Segment {
    pub fn new(value: impl Into<String>) -> Self {
        Segment(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoUrlRequest {
    pub server_key: String,
    pub media_type: Segment,
    pub media_id: Segment,
    #[serde(default)]
    pub season: Option<Segment>,
    #[serde(default)]
    pub episode: Option<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVideo {
    pub url: String,
    pub server_name: String,
}

/// Immutable, key-sorted set of configured video servers.
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    servers: Vec<VideoServerConfig>,
}

impl ServerRegistry {
    pub fn new(mut servers: Vec<VideoServerConfig>) -> Self {
        servers.sort_by(|a, b| a.key.cmp(&b.key));
        Self { servers }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Case-insensitive lookup by server key.
    pub fn find(&self, key: &str) -> Option<&VideoServerConfig> {
        let key = key.trim();
        self.servers
            .iter()
            .find(|server| server.key.eq_ignore_ascii_case(key))
    }

    pub fn summaries(&self) -> Vec<ServerSummary> {
        self.servers
            .iter()
            .map(|server| ServerSummary {
                key: server.key.clone(),
                name: server.name.clone(),
            })
            .collect()
    }

    pub fn resolve(&self, request: &VideoUrlRequest) -> ApiResult<ResolvedVideo> {
        let server_key = request.server_key.trim();
        if server_key.is_empty() {
            return Err(ApiError::MalformedRequest("serverKey is required".into()));
        }
        let media_type = require_segment("mediaType", &request.media_type)?;
        let media_id = require_segment("mediaId", &request.media_id)?;

        let server = self
            .find(server_key)
            .ok_or_else(|| ApiError::UnknownServer {
                key: server_key.to_string(),
            })?;

        let mut url = format!("{}{}/{}", server.base_url, media_type, media_id);

        if EPISODIC_MEDIA_TYPES.contains(&media_type) {
            match (&request.season, &request.episode) {
                (Some(season), Some(episode)) => {
                    let season = require_segment("season", season)?;
                    let episode = require_segment("episode", episode)?;
                    url.push('/');
                    url.push_str(season);
                    url.push('/');
                    url.push_str(episode);
                }
                (None, None) => {}
                _ => {
                    return Err(ApiError::MalformedRequest(
                        "season and episode must be provided together".into(),
                    ));
                }
            }
        }

        Ok(ResolvedVideo {
            url,
            server_name: server.name.clone(),
        })
    }
}

fn require_segment<'a>(field: &str, segment: &'a Segment) -> ApiResult<&'a str> {
    let value = segment.as_str();
    if value.is_empty() {
        return Err(ApiError::MalformedRequest(format!("{field} is required")));
    }
    if value
        .chars()
        .any(|c| matches!(c, '/' | '?' | '#') || c.is_whitespace())
    {
        return Err(ApiError::MalformedRequest(format!(
            "{field} contains characters that are not allowed in a path segment"
        )));
    }
    Ok(value)
}
