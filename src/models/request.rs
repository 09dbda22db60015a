use actix_web::http::header::{self, HeaderMap};
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, AppResult};

/// Raw query string of `/proxy`.
#[derive(Debug, Default, Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
    pub transcode: Option<String>,
}

/// One validated inbound proxy call.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub target: Url,
    pub range: Option<String>,
    pub force_remux: bool,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

impl ProxyRequest {
    pub fn new(target: Url) -> Self {
        Self {
            target,
            range: None,
            force_remux: false,
            user_agent: None,
            referer: None,
        }
    }

    /// Validates the query and captures the client context the pipelines care about.
    /// No network access happens here.
    pub fn from_parts(query: ProxyQuery, headers: &HeaderMap) -> AppResult<Self> {
        let raw = query
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AppError::InvalidRequest("missing url parameter".to_string()))?;

        let target = parse_target(raw)?;
        let header_str = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };

        Ok(Self {
            target,
            range: header_str(header::RANGE),
            force_remux: query
                .transcode
                .as_deref()
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            user_agent: header_str(header::USER_AGENT),
            referer: header_str(header::REFERER),
        })
    }
}

pub fn parse_target(raw: &str) -> AppResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| AppError::InvalidRequest(format!("url is not an absolute URL: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::InvalidRequest(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(AppError::InvalidRequest("url has no host".to_string()));
    }

    Ok(url)
}

/// Upstream headers relayed to the client as-is. Content-Type is normalized separately.
pub const SUPPORTED_RESPONSE_HEADERS: &[&str] = &[
    "content-length",
    "content-range",
    "etag",
    "last-modified",
    "cache-control",
    "expires",
];

/// Headers the browser may read from a cross-origin media response.
pub const EXPOSED_RESPONSE_HEADERS: &[&str] = &[
    "content-length",
    "content-range",
    "accept-ranges",
    "content-type",
];
