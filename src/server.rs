//! HTTP surface of the backend.
//!
//! - `GET  /api/tmdb/{*path}`  cached, rate-limited passthrough to TMDB
//! - `POST /api/video-url`     resolve a playback link on a configured server
//! - `GET  /api/video-servers` list configured servers as `{key, name}`
//! - `GET  /health`            liveness check
//!
//! Only the TMDB route is throttled. The other routes never leave the process
//! and are cheap, so they stay unthrottled.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, Query, Request, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::Value;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    cache::ResponseCache,
    config::AppConfig,
    error::{ApiError, ApiResult},
    proxy::MetadataProxy,
    rate_limit::{RateDecision, RateLimiter, ceil_secs},
    upstream::{MetadataUpstream, TmdbClient},
    video::{ServerRegistry, ServerSummary, VideoUrlRequest},
};

const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

#[derive(Clone)]
pub struct AppState {
    proxy: MetadataProxy,
    limiter: Arc<RateLimiter>,
    registry: Arc<ServerRegistry>,
    trust_proxy: bool,
    cors_origins: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(proxy: MetadataProxy, limiter: Arc<RateLimiter>, registry: ServerRegistry) -> Self {
        Self {
            proxy,
            limiter,
            registry: Arc::new(registry),
            trust_proxy: false,
            cors_origins: Arc::new(vec!["*".to_string()]),
        }
    }

    /// Wires the production TMDB client and the stores described by `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let upstream: Arc<dyn MetadataUpstream> = Arc::new(TmdbClient::new(&config.tmdb));
        Self::with_upstream(config, upstream)
    }

    pub fn with_upstream(config: &AppConfig, upstream: Arc<dyn MetadataUpstream>) -> Self {
        let cache = Arc::new(ResponseCache::new(
            config.cache.ttl,
            config.cache.max_entries,
        ));
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.window,
            config.rate_limit.max_requests,
        ));
        let mut state = Self::new(
            MetadataProxy::new(cache, upstream),
            limiter,
            ServerRegistry::new(config.servers.clone()),
        );
        state.trust_proxy = config.trust_proxy;
        state.cors_origins = Arc::new(config.cors_origins.clone());
        state
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        self.proxy.cache()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }
}

pub fn router(state: AppState) -> Router {
    let tmdb = Router::new()
        .route("/api/tmdb/{*path}", get(proxy_tmdb))
        .route_layer(middleware::from_fn_with_state(state.clone(), throttle));

    let cors = build_cors_layer(&state.cors_origins);

    Router::new()
        .merge(tmdb)
        .route("/api/video-url", post(video_url))
        .route("/api/video-servers", get(video_servers))
        .route("/health", get(|| async { "OK" }))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        AllowOrigin::list(allowed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600))
}

async fn throttle(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let client = client_id(&request, state.trust_proxy);

    match state.limiter.check(&client) {
        RateDecision::Allow {
            limit,
            remaining,
            reset_after,
        } => {
            let mut response = next.run(request).await;
            insert_rate_headers(response.headers_mut(), limit, remaining, reset_after);
            response
        }
        RateDecision::Reject { limit, retry_after } => {
            tracing::info!(%client, "rate limit exceeded on TMDB proxy");
            let window_minutes = state.limiter.window().as_secs().div_ceil(60);
            let mut response = ApiError::RateLimited {
                retry_after_secs: ceil_secs(retry_after),
                window_minutes,
            }
            .into_response();
            insert_rate_headers(response.headers_mut(), limit, 0, retry_after);
            response
        }
    }
}

fn insert_rate_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset: Duration) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(ceil_secs(reset)));
}

/// Identifies the caller by socket peer address, or by the first
/// `X-Forwarded-For` hop when the deployment sits behind a trusted proxy.
fn client_id(request: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = request
            .headers()
            .get(X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(forwarded) = forwarded {
            return forwarded.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn proxy_tmdb(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Arc<Value>>> {
    let value = state.proxy.fetch(&path, query).await?;
    Ok(Json(value))
}

#[derive(Debug, Serialize)]
struct VideoUrlResponse {
    url: String,
}

async fn video_url(
    State(state): State<AppState>,
    payload: Result<Json<VideoUrlRequest>, JsonRejection>,
) -> ApiResult<Json<VideoUrlResponse>> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection.body_text(), "rejected video-url request body");
        ApiError::MalformedRequest(rejection.body_text())
    })?;

    match state.registry.resolve(&request) {
        Ok(resolved) => {
            tracing::info!(
                server = %resolved.server_name,
                url = %resolved.url,
                "generated video URL"
            );
            Ok(Json(VideoUrlResponse { url: resolved.url }))
        }
        Err(err) => {
            match &err {
                ApiError::UnknownServer { key } => {
                    tracing::info!(server_key = %key, "video-url request for unknown server");
                }
                ApiError::MalformedRequest(message) => {
                    tracing::warn!(%message, "malformed video-url request");
                }
                other => {
                    tracing::error!(error = %other, "error generating video URL");
                }
            }
            Err(err)
        }
    }
}

async fn video_servers(State(state): State<AppState>) -> Json<Vec<ServerSummary>> {
    Json(state.registry.summaries())
}
