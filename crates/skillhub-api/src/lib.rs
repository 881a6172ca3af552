//! HTTP API surface
//!
//! Thin axum routes over the store and the search planner:
//! - `GET  /api/skills`: catalog search (ranked with fallback)
//! - `GET  /api/categories`: category names with counts
//! - `GET  /api/stats`: catalog-wide aggregates
//! - `POST /api/telemetry`: client event ingestion
//! - `GET  /sitemap.xml`: url list for crawlers
//! - `GET  /health`: liveness (unthrottled)
//!
//! Every throttled route keys the rate limiter on `<client-ip>:<bucket>` and
//! emits `X-RateLimit-*` headers on success and failure alike; rejections get
//! a 429 with `Retry-After`. Data-source failures surface as a 500 with an
//! error body, never a partial skill list.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use skillhub_core::{clamp_limit, SearchRequest, SortBy, DEFAULT_LIMIT};
use skillhub_ratelimit::{RateLimitConfig, RateLimiter};
use skillhub_search::SearchPlanner;
use skillhub_store::SkillStore;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, error};

const HEADER_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const HEADER_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const HEADER_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Per-bucket request budgets. Policy constants, not algorithm: changing
/// them never changes limiter behavior.
#[derive(Debug, Clone, Copy)]
pub struct RateBudgets {
    pub api: RateLimitConfig,
    pub search: RateLimitConfig,
    pub stats: RateLimitConfig,
    pub telemetry: RateLimitConfig,
    pub sitemap: RateLimitConfig,
}

impl Default for RateBudgets {
    fn default() -> Self {
        RateBudgets {
            api: RateLimitConfig::per_minute(60),
            search: RateLimitConfig::per_minute(30),
            stats: RateLimitConfig::per_minute(20),
            telemetry: RateLimitConfig::per_minute(100),
            sitemap: RateLimitConfig::per_minute(10),
        }
    }
}

/// Shared state behind every handler.
pub struct ApiState {
    pub planner: SearchPlanner<SkillStore>,
    pub store: SkillStore,
    pub limiter: Arc<RateLimiter>,
    pub budgets: RateBudgets,
    /// Absolute site origin used in sitemap urls, e.g. `https://skillhub.dev`.
    pub base_url: String,
}

impl ApiState {
    pub fn new(store: SkillStore, limiter: Arc<RateLimiter>, base_url: impl Into<String>) -> Self {
        ApiState {
            planner: SearchPlanner::new(store.clone()),
            store,
            limiter,
            budgets: RateBudgets::default(),
            base_url: base_url.into(),
        }
    }

    pub fn with_budgets(mut self, budgets: RateBudgets) -> Self {
        self.budgets = budgets;
        self
    }
}

/// Build the full application router.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/skills", get(search_skills))
        .route("/api/categories", get(categories))
        .route("/api/stats", get(stats))
        .route("/api/telemetry", post(telemetry))
        .route("/sitemap.xml", get(sitemap))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Best client identifier available from proxy headers, else `"unknown"`.
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return first.to_string();
        }
    }
    for name in ["x-real-ip", "cf-connecting-ip"] {
        if let Some(ip) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return ip.to_string();
        }
    }
    "unknown".to_string()
}

/// Admit or reject under the bucket's budget. On admit, returns the
/// `X-RateLimit-*` headers to attach; on reject, a finished 429 response.
fn throttle(
    state: &ApiState,
    headers: &HeaderMap,
    bucket: &str,
    cfg: RateLimitConfig,
) -> std::result::Result<HeaderMap, Response> {
    let key = format!("{}:{}", client_ip(headers), bucket);
    let decision = state.limiter.check(&key, cfg);

    let mut out = HeaderMap::new();
    out.insert(HEADER_LIMIT, HeaderValue::from(decision.limit));
    out.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));
    out.insert(HEADER_RESET, HeaderValue::from(decision.reset_at_ms));

    if decision.success {
        return Ok(out);
    }

    debug!(bucket, "request throttled");
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let retry_after_secs = decision
        .reset_at_ms
        .saturating_sub(now_ms)
        .div_ceil(1000)
        .max(1);
    out.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));

    Err((
        StatusCode::TOO_MANY_REQUESTS,
        out,
        Json(json!({ "error": "Too many requests" })),
    )
        .into_response())
}

/// Query parameters of `GET /api/skills`. Unknown sort keys fall back to
/// the default ordering rather than failing the request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkillsQuery {
    pub search: String,
    pub limit: u32,
    pub sort_by: String,
    pub category: Option<String>,
    pub author: Option<String>,
    pub offset: u32,
    pub min_stars: i64,
    pub has_content: bool,
}

impl Default for SkillsQuery {
    fn default() -> Self {
        SkillsQuery {
            search: String::new(),
            limit: DEFAULT_LIMIT,
            sort_by: SortBy::Stars.as_str().to_string(),
            category: None,
            author: None,
            offset: 0,
            min_stars: 0,
            has_content: false,
        }
    }
}

impl SkillsQuery {
    fn into_request(self) -> SearchRequest {
        let sort_by = self.sort_by.parse().unwrap_or_else(|_| {
            debug!(sort_by = %self.sort_by, "unknown sort key, using default");
            SortBy::default()
        });
        SearchRequest {
            query: self.search,
            limit: clamp_limit(self.limit),
            offset: self.offset,
            category: self.category,
            author: self.author,
            min_stars: self.min_stars.max(0),
            has_content: self.has_content,
            sort_by,
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "skillhub",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn search_skills(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(params): Query<SkillsQuery>,
) -> Response {
    let rl = match throttle(&state, &headers, "search", state.budgets.search) {
        Ok(rl) => rl,
        Err(rejected) => return rejected,
    };

    let req = params.into_request();
    match state.planner.search(&req).await {
        Ok(results) => (StatusCode::OK, rl, Json(results)).into_response(),
        Err(err) => {
            error!(error = %err, "skill search failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                rl,
                Json(json!({ "error": "Failed to search skills" })),
            )
                .into_response()
        }
    }
}

async fn categories(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let rl = match throttle(&state, &headers, "api", state.budgets.api) {
        Ok(rl) => rl,
        Err(rejected) => return rejected,
    };

    match state.store.category_counts().await {
        Ok(counts) => (StatusCode::OK, rl, Json(json!({ "categories": counts }))).into_response(),
        Err(err) => {
            error!(error = %err, "category listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                rl,
                Json(json!({ "error": "Failed to load categories" })),
            )
                .into_response()
        }
    }
}

async fn stats(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let rl = match throttle(&state, &headers, "stats", state.budgets.stats) {
        Ok(rl) => rl,
        Err(rejected) => return rejected,
    };

    match state.store.stats().await {
        Ok(stats) => (StatusCode::OK, rl, Json(stats)).into_response(),
        Err(err) => {
            error!(error = %err, "stats aggregation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                rl,
                Json(json!({ "error": "Failed to load stats" })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct TelemetryBody {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

async fn telemetry(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<TelemetryBody>,
) -> Response {
    let rl = match throttle(&state, &headers, "telemetry", state.budgets.telemetry) {
        Ok(rl) => rl,
        Err(rejected) => return rejected,
    };

    if body.event.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            rl,
            Json(json!({ "error": "event must be non-empty" })),
        )
            .into_response();
    }

    match state.store.record_telemetry(&body.event, &body.payload).await {
        Ok(id) => (
            StatusCode::ACCEPTED,
            rl,
            Json(json!({ "ok": true, "id": id })),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "telemetry ingest failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                rl,
                Json(json!({ "error": "Failed to record event" })),
            )
                .into_response()
        }
    }
}

async fn sitemap(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let rl = match throttle(&state, &headers, "sitemap", state.budgets.sitemap) {
        Ok(rl) => rl,
        Err(rejected) => return rejected,
    };

    match state.store.sitemap_entries().await {
        Ok(entries) => {
            let xml = render_sitemap(&state.base_url, &entries);
            (
                StatusCode::OK,
                rl,
                [(header::CONTENT_TYPE, "application/xml")],
                xml,
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "sitemap generation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                rl,
                Json(json!({ "error": "Failed to build sitemap" })),
            )
                .into_response()
        }
    }
}

fn render_sitemap(base_url: &str, entries: &[skillhub_store::SitemapEntry]) -> String {
    let base = base_url.trim_end_matches('/');
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );
    for entry in entries {
        xml.push_str("  <url>\n    <loc>");
        xml.push_str(&xml_escape(&format!(
            "{}/skills/{}",
            base, entry.scoped_name
        )));
        xml.push_str("</loc>\n");
        if let Some(updated) = entry.updated_at {
            xml.push_str("    <lastmod>");
            xml.push_str(&updated.format("%Y-%m-%d").to_string());
            xml.push_str("</lastmod>\n");
        }
        xml.push_str("  </url>\n");
    }
    xml.push_str("</urlset>\n");
    xml
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_forwarded_for_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }

    #[test]
    fn client_ip_falls_through_header_chain() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("198.51.100.3"));
        assert_eq!(client_ip(&headers), "198.51.100.3");

        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn skills_query_clamps_limit_and_defaults_sort() {
        let query = SkillsQuery {
            limit: 5000,
            sort_by: "bogus".to_string(),
            ..Default::default()
        };
        let req = query.into_request();
        assert_eq!(req.limit, skillhub_core::MAX_LIMIT);
        assert_eq!(req.sort_by, SortBy::Stars);
    }

    #[test]
    fn sitemap_renders_lastmod_only_when_known() {
        let entries = vec![
            skillhub_store::SitemapEntry {
                scoped_name: "@alice/scraper".to_string(),
                updated_at: chrono::DateTime::from_timestamp(1_700_000_000, 0),
            },
            skillhub_store::SitemapEntry {
                scoped_name: "@bob/writer".to_string(),
                updated_at: None,
            },
        ];
        let xml = render_sitemap("https://skillhub.dev/", &entries);
        assert!(xml.contains("<loc>https://skillhub.dev/skills/@alice/scraper</loc>"));
        assert!(xml.contains("<lastmod>2023-11-14</lastmod>"));
        assert_eq!(xml.matches("<lastmod>").count(), 1);
    }
}
