use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::ProxyConfig,
    error::{AppError, AppResult},
    models::{request::SUPPORTED_RESPONSE_HEADERS, ProxyRequest},
    proxy::{
        container,
        router::ProviderFilter,
        stream::{relay_body, ResponseStream},
        upstream::{UpstreamFetch, UpstreamRequest, UpstreamResponse},
    },
};

/// Cookies set by redirect hops, replayed on every later hop of the same session.
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: Vec<(String, String)>,
}

impl CookieJar {
    pub fn absorb(&mut self, headers: &HeaderMap) {
        for value in headers.get_all(header::SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            let mut parts = raw.split(';');
            let Some((name, value)) = parts.next().and_then(|p| p.split_once('=')) else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }

            let expired = parts.any(|attr| {
                attr.split_once('=').is_some_and(|(k, v)| {
                    k.trim().eq_ignore_ascii_case("max-age")
                        && v.trim().parse::<i64>().is_ok_and(|age| age <= 0)
                })
            });

            self.cookies.retain(|(n, _)| n != name);
            if !expired {
                self.cookies.push((name.to_string(), value.trim().to_string()));
            }
        }
    }

    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(n, v)| format!("{}={}", n, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Hop state of one redirect-following session. Owned by a single request.
#[derive(Debug)]
pub struct RelayContext {
    pub url: Url,
    pub hops: usize,
    pub cookies: CookieJar,
}

impl RelayContext {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            hops: 0,
            cookies: CookieJar::default(),
        }
    }

    /// Moves to the next hop, refusing once `max_hops` redirects were already taken.
    pub fn follow(&mut self, next: Url, max_hops: usize) -> AppResult<()> {
        if self.hops >= max_hops {
            return Err(AppError::TooManyRedirects(self.hops));
        }
        self.hops += 1;
        self.url = next;
        Ok(())
    }
}

pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: Vec<(&'static str, String)>,
    pub body: ResponseStream,
}

impl RelayResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone)]
pub struct RelayPipeline {
    fetcher: Arc<dyn UpstreamFetch>,
    config: ProxyConfig,
    providers: ProviderFilter,
}

impl RelayPipeline {
    pub fn new(fetcher: Arc<dyn UpstreamFetch>, config: ProxyConfig) -> Self {
        Self {
            fetcher,
            config,
            providers: ProviderFilter::default(),
        }
    }

    /// Refuse redirect hops that land on an excluded provider.
    pub fn with_providers(mut self, providers: ProviderFilter) -> Self {
        self.providers = providers;
        self
    }

    pub fn user_agent<'a>(&'a self, request: &'a ProxyRequest) -> &'a str {
        match request.user_agent.as_deref() {
            Some(ua) if self.config.forward_user_agent => ua,
            _ => &self.config.user_agent,
        }
    }

    pub fn outbound_headers(
        &self,
        ctx: &RelayContext,
        request: &ProxyRequest,
    ) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, header_value(self.user_agent(request))?);
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::REFERER, header_value(&origin_referer(&ctx.url))?);

        if let Some(cookies) = ctx.cookies.header_value() {
            headers.insert(header::COOKIE, header_value(&cookies)?);
        }
        if let Some(range) = request.range.as_deref() {
            headers.insert(
                header::RANGE,
                HeaderValue::from_str(range)
                    .map_err(|_| AppError::InvalidRequest("invalid Range header".to_string()))?,
            );
        }

        Ok(headers)
    }

    /// Resolves redirects server-side and returns the terminal upstream response
    /// ready to stream. Errors here happen before any byte reaches the client.
    pub async fn open(&self, request: &ProxyRequest, method: Method) -> AppResult<RelayResponse> {
        let mut ctx = RelayContext::new(request.target.clone());

        loop {
            let headers = self.outbound_headers(&ctx, request)?;
            debug!("Fetching {} (hop {})", ctx.url, ctx.hops);

            let response = self
                .fetcher
                .fetch(UpstreamRequest {
                    method: method.clone(),
                    url: ctx.url.clone(),
                    headers,
                })
                .await
                .map_err(|e| {
                    warn!("Upstream fetch of {} failed: {}", ctx.url, e);
                    AppError::from(e)
                })?;

            if response.status.is_redirection() {
                // Raw bytes: servers do send unencoded UTF-8 here, which `to_str` rejects.
                if let Some(location) = response.headers.get(header::LOCATION) {
                    let location = String::from_utf8_lossy(location.as_bytes());
                    let next = resolve_location(&ctx.url, &location)?;
                    self.providers.check(&next).inspect_err(|_| {
                        warn!("{} redirected into excluded provider {}", ctx.url, next);
                    })?;
                    ctx.cookies.absorb(&response.headers);
                    info!(
                        "Following {} redirect {} -> {}",
                        response.status, ctx.url, next
                    );
                    ctx.follow(next, self.config.max_redirects).inspect_err(|_| {
                        warn!("Redirect limit reached for {}", request.target);
                    })?;
                    continue;
                }
            }

            return Ok(self.finish(request, &ctx, response, method == Method::HEAD));
        }
    }

    fn finish(
        &self,
        request: &ProxyRequest,
        ctx: &RelayContext,
        response: UpstreamResponse,
        head_only: bool,
    ) -> RelayResponse {
        info!(
            "Relaying {} from {} after {} redirect(s)",
            response.status, ctx.url, ctx.hops
        );

        let hint = if container::extension(&ctx.url).is_some() {
            &ctx.url
        } else {
            &request.target
        };
        let mut headers = vec![(
            "content-type",
            container::normalize_content_type(response.header("content-type"), hint),
        )];
        for &name in SUPPORTED_RESPONSE_HEADERS {
            if let Some(value) = response.header(name) {
                headers.push((name, value.to_string()));
            }
        }
        headers.push(("accept-ranges", "bytes".to_string()));
        headers.push(("cross-origin-resource-policy", "cross-origin".to_string()));

        let body = if head_only {
            ResponseStream::empty()
        } else {
            relay_body(
                response.body,
                self.config.idle_timeout(),
                self.config.buffer_size,
                ctx.url.to_string(),
            )
        };

        RelayResponse {
            status: response.status,
            headers,
            body,
        }
    }
}

fn header_value(value: &str) -> AppResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::Internal(format!("Invalid header value: {}", e)))
}

/// `scheme://host[:port]/` of the hop, so the request looks like it came from the origin's own page.
pub fn origin_referer(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{}:{}/", url.scheme(), host, port),
        None => format!("{}://{}/", url.scheme(), host),
    }
}

fn resolve_location(current: &Url, location: &str) -> AppResult<Url> {
    let next = current.join(location.trim()).map_err(|e| {
        AppError::UpstreamUnreachable(format!("invalid redirect location '{}': {}", location, e))
    })?;
    if !matches!(next.scheme(), "http" | "https") {
        return Err(AppError::UpstreamUnreachable(format!(
            "redirect to unsupported scheme '{}'",
            next.scheme()
        )));
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn jar_captures_and_replaces_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_static("session=abc; Path=/; HttpOnly"),
        );
        headers.append(header::SET_COOKIE, HeaderValue::from_static("cdn=1"));

        let mut jar = CookieJar::default();
        jar.absorb(&headers);
        assert_eq!(jar.header_value().as_deref(), Some("session=abc; cdn=1"));

        let mut next = HeaderMap::new();
        next.append(header::SET_COOKIE, HeaderValue::from_static("session=def"));
        next.append(
            header::SET_COOKIE,
            HeaderValue::from_static("cdn=gone; Max-Age=0"),
        );
        jar.absorb(&next);
        assert_eq!(jar.header_value().as_deref(), Some("session=def"));
    }

    #[test]
    fn follow_enforces_hop_cap() {
        let mut ctx = RelayContext::new(url("https://a.example.com/"));
        for i in 1..=3 {
            ctx.follow(url(&format!("https://a.example.com/{}", i)), 3)
                .unwrap();
        }
        assert_eq!(ctx.hops, 3);
        let err = ctx.follow(url("https://a.example.com/4"), 3).unwrap_err();
        assert!(matches!(err, AppError::TooManyRedirects(3)));
        assert_eq!(ctx.url.as_str(), "https://a.example.com/3");
    }

    #[test]
    fn relative_locations_resolve_against_current_hop() {
        let current = url("https://cdn.example.com/videos/a/file.mp4?x=1");
        assert_eq!(
            resolve_location(&current, "/b/file.mp4").unwrap().as_str(),
            "https://cdn.example.com/b/file.mp4"
        );
        assert_eq!(
            resolve_location(&current, "other.mp4").unwrap().as_str(),
            "https://cdn.example.com/videos/a/other.mp4"
        );
        assert_eq!(
            resolve_location(&current, "//edge.example.net/c.mp4")
                .unwrap()
                .as_str(),
            "https://edge.example.net/c.mp4"
        );
        assert!(resolve_location(&current, "ftp://files.example.com/x").is_err());
    }

    #[test]
    fn referer_keeps_explicit_port() {
        assert_eq!(
            origin_referer(&url("http://10.0.0.5:8080/media/x.mp4")),
            "http://10.0.0.5:8080/"
        );
        assert_eq!(
            origin_referer(&url("https://cdn.example.com/x.mp4")),
            "https://cdn.example.com/"
        );
    }

    #[test]
    fn non_ascii_locations_are_percent_encoded() {
        let current = url("https://cdn.example.com/start.mp4");
        let raw = HeaderValue::from_bytes("/vidéo.mp4".as_bytes()).unwrap();
        assert!(raw.to_str().is_err());

        let location = String::from_utf8_lossy(raw.as_bytes());
        assert_eq!(
            resolve_location(&current, &location).unwrap().as_str(),
            "https://cdn.example.com/vid%C3%A9o.mp4"
        );
    }
}
