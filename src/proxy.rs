use std::sync::Arc;

use serde_json::Value;
use tokio::task;

use crate::{
    cache::{ResponseCache, cache_key},
    error::{ApiError, ApiResult},
    upstream::{MetadataUpstream, UpstreamError},
};

/// Query parameters the proxy refuses to forward; the server-held key wins.
const RESERVED_PARAMS: &[&str] = &["api_key"];

/// Cache-aware passthrough to the upstream metadata API.
#[derive(Clone)]
pub struct MetadataProxy {
    cache: Arc<ResponseCache>,
    upstream: Arc<dyn MetadataUpstream>,
}

impl MetadataProxy {
    pub fn new(cache: Arc<ResponseCache>, upstream: Arc<dyn MetadataUpstream>) -> Self {
        Self { cache, upstream }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Returns the upstream JSON for `path` + `query`, from cache when a live
    /// entry exists. Two concurrent misses may both reach upstream; the later
    /// write wins.
    pub async fn fetch(&self, path: &str, query: Vec<(String, String)>) -> ApiResult<Arc<Value>> {
        let query: Vec<(String, String)> = query
            .into_iter()
            .filter(|(key, _)| !RESERVED_PARAMS.contains(&key.as_str()))
            .collect();
        let key = cache_key(path, &query);

        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(%key, "cache hit");
            return Ok(cached);
        }
        tracing::debug!(%key, "cache miss, fetching upstream");

        let upstream = self.upstream.clone();
        let result = task::spawn_blocking({
            let path = path.to_owned();
            let query = query.clone();
            move || upstream.fetch(&path, &query)
        })
        .await
        .map_err(|err| ApiError::Internal(format!("task join error: {err}")))?;

        match result {
            Ok(value) => Ok(self.cache.set(key, value)),
            Err(err) => {
                match &err {
                    UpstreamError::Status { status, body } => {
                        tracing::error!(
                            tmdb_path = %path,
                            ?query,
                            status,
                            body = %body,
                            "TMDB API responded with error"
                        );
                    }
                    other => {
                        tracing::error!(
                            tmdb_path = %path,
                            ?query,
                            error = %other,
                            "error occurred while proxying to TMDB"
                        );
                    }
                }
                Err(ApiError::UpstreamFailure {
                    reason: err.client_reason(),
                })
            }
        }
    }
}
