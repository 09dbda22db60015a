use regex::Regex;
use url::Url;

use crate::{
    error::{AppError, AppResult},
    models::ProxyRequest,
    proxy::container,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Remux,
}

/// Host patterns in `all://*.example.com` form. `all://` stands for http or https,
/// `*` for any run of characters inside the host. Matched against the URL's
/// scheme and host only, never the raw URL text.
#[derive(Debug, Clone)]
pub struct ProviderRule {
    pub pattern: Regex,
    pub source: String,
}

impl ProviderRule {
    pub fn compile(source: &str) -> Option<Self> {
        let pattern = source
            .replace('.', "\\.")
            .replace('*', "[^/:@]*")
            .replace("all://", "(http|https)://");

        match Regex::new(&format!("^{}$", pattern)) {
            Ok(pattern) => Some(Self {
                pattern,
                source: source.to_string(),
            }),
            Err(e) => {
                tracing::error!("Invalid provider pattern '{}': {}", source, e);
                None
            }
        }
    }

    pub fn matches(&self, url: &Url) -> bool {
        provider_key(url).is_some_and(|key| self.pattern.is_match(&key))
    }
}

/// `scheme://host` with userinfo, port, path and a trailing root dot removed.
fn provider_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_end_matches('.');
    Some(format!("{}://{}", url.scheme(), host.to_ascii_lowercase()))
}

/// Compiled exclusion list, shared by the router and every redirect hop of the relay.
#[derive(Debug, Clone, Default)]
pub struct ProviderFilter {
    rules: Vec<ProviderRule>,
}

impl ProviderFilter {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            rules: patterns
                .iter()
                .filter_map(|p| ProviderRule::compile(p))
                .collect(),
        }
    }

    pub fn matching(&self, url: &Url) -> Option<&ProviderRule> {
        self.rules.iter().find(|rule| rule.matches(url))
    }

    pub fn check(&self, url: &Url) -> AppResult<()> {
        match self.matching(url) {
            Some(rule) => {
                tracing::debug!("{} matched excluded provider {}", url, rule.source);
                Err(AppError::UnsupportedProvider(
                    url.host_str().unwrap_or_default().to_string(),
                ))
            }
            None => Ok(()),
        }
    }
}

/// Picks the pipeline for a request. Never touches the network.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    providers: ProviderFilter,
    remux_extensions: Vec<String>,
}

impl RequestRouter {
    pub fn new(providers: ProviderFilter, remux_extensions: &[String]) -> Self {
        Self {
            providers,
            remux_extensions: remux_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn excluded_provider(&self, request: &ProxyRequest) -> Option<&ProviderRule> {
        self.providers.matching(&request.target)
    }

    pub fn needs_remux(&self, request: &ProxyRequest) -> bool {
        container::extension(&request.target)
            .is_some_and(|ext| self.remux_extensions.iter().any(|e| *e == ext))
    }

    pub fn classify(&self, request: &ProxyRequest) -> AppResult<Route> {
        self.providers.check(&request.target)?;

        if request.force_remux || self.needs_remux(request) {
            Ok(Route::Remux)
        } else {
            Ok(Route::Direct)
        }
    }
}
