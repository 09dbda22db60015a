#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use media_relay_gateway::config::{
    Config, PlayerConfig, PolicyConfig, ProxyConfig, RemuxConfig, ServerConfig,
    DEFAULT_USER_AGENT,
};
use media_relay_gateway::proxy::remux::{ProcessLauncher, RemuxJob};
use media_relay_gateway::proxy::upstream::{
    FetchError, UpstreamFetch, UpstreamRequest, UpstreamResponse,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use tokio::process::Command;

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers: 1,
        },
        proxy: ProxyConfig {
            connect_timeout: 2,
            response_timeout: 2,
            idle_timeout: 2,
            max_redirects: 10,
            verify_ssl: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            forward_user_agent: false,
            buffer_size: 1024,
            upstream_proxy: None,
        },
        remux: RemuxConfig {
            ffmpeg_path: "ffmpeg".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            native_rate: true,
            first_byte_timeout: 2,
            chunk_size: 4096,
            extensions: ["mkv", "avi", "flv", "wmv"]
                .into_iter()
                .map(String::from)
                .collect(),
        },
        policy: PolicyConfig {
            rate_limit_requests: 1000,
            rate_limit_window: 60,
            allowed_origins: vec!["*".to_string()],
            excluded_providers: vec![
                "all://youtube.com".to_string(),
                "all://*.youtube.com".to_string(),
            ],
            trust_forwarded_for: false,
        },
        player: PlayerConfig {
            drm_license_url: Some("https://license.example.com/wv".to_string()),
        },
    }
}

/// What a scripted upstream answers for one URL.
#[derive(Clone)]
pub enum Scripted {
    Resource {
        content_type: Option<String>,
        body: Vec<u8>,
        ranges: bool,
    },
    Redirect {
        status: u16,
        location: String,
        set_cookie: Option<String>,
    },
    Unreachable,
    Timeout,
}

impl Scripted {
    pub fn resource(content_type: &str, body: &[u8]) -> Self {
        Scripted::Resource {
            content_type: Some(content_type.to_string()),
            body: body.to_vec(),
            ranges: true,
        }
    }

    pub fn redirect(location: &str) -> Self {
        Scripted::Redirect {
            status: 302,
            location: location.to_string(),
            set_cookie: None,
        }
    }
}

/// In-memory upstream that records every request it sees.
#[derive(Clone, Default)]
pub struct FakeUpstream {
    routes: Arc<Mutex<HashMap<String, Scripted>>>,
    seen: Arc<Mutex<Vec<UpstreamRequest>>>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, scripted: Scripted) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), scripted);
        self
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// `a`, `a/1`, ... `a/n` where each hop redirects to the next and the last serves `body`.
    pub fn redirect_chain(&self, base: &str, hops: usize, body: &[u8]) -> String {
        for i in 0..hops {
            let from = hop_url(base, i);
            let to = hop_url(base, i + 1);
            self.route(&from, Scripted::redirect(&to));
        }
        self.route(&hop_url(base, hops), Scripted::resource("video/mp4", body));
        hop_url(base, 0)
    }
}

pub fn hop_url(base: &str, i: usize) -> String {
    format!("{}/hop{}.mp4", base.trim_end_matches('/'), i)
}

fn headers(pairs: &[(&str, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_bytes(value.as_bytes()).unwrap(),
        );
    }
    map
}

/// `bytes=X-Y` / `bytes=X-` against a body of `len` bytes.
fn parse_range(range: &str, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let bounds = range.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = if end.is_empty() {
        len - 1
    } else {
        end.parse::<usize>().ok()?.min(len - 1)
    };
    (start <= end).then_some((start, end))
}

#[async_trait]
impl UpstreamFetch for FakeUpstream {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
        self.seen.lock().unwrap().push(request.clone());
        let scripted = self
            .routes
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned();

        let (status, header_pairs, body) = match scripted {
            None => (StatusCode::NOT_FOUND, vec![], b"missing".to_vec()),
            Some(Scripted::Unreachable) => {
                return Err(FetchError::Unreachable("connection refused".to_string()))
            }
            Some(Scripted::Timeout) => {
                return Err(FetchError::Timeout("response headers".to_string()))
            }
            Some(Scripted::Redirect {
                status,
                location,
                set_cookie,
            }) => {
                let mut pairs = vec![("location", location)];
                if let Some(cookie) = set_cookie {
                    pairs.push(("set-cookie", cookie));
                }
                (StatusCode::from_u16(status).unwrap(), pairs, vec![])
            }
            Some(Scripted::Resource {
                content_type,
                body,
                ranges,
            }) => {
                let mut pairs = vec![("etag", "\"v1\"".to_string())];
                if let Some(ct) = content_type {
                    pairs.push(("content-type", ct));
                }
                let range = request
                    .headers
                    .get("range")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|r| parse_range(r, body.len()));

                match range {
                    Some((start, end)) if ranges => {
                        pairs.push((
                            "content-range",
                            format!("bytes {}-{}/{}", start, end, body.len()),
                        ));
                        pairs.push(("content-length", (end - start + 1).to_string()));
                        (
                            StatusCode::PARTIAL_CONTENT,
                            pairs,
                            body[start..=end].to_vec(),
                        )
                    }
                    _ => {
                        pairs.push(("content-length", body.len().to_string()));
                        (StatusCode::OK, pairs, body)
                    }
                }
            }
        };

        let body = if request.method == Method::HEAD {
            Vec::new()
        } else {
            body
        };
        // Deliver in small chunks so ordering across chunks is exercised.
        let chunks: Vec<std::io::Result<Bytes>> = body
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        Ok(UpstreamResponse {
            status,
            headers: headers(&header_pairs),
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// Runs an `sh -c` script instead of ffmpeg and remembers every job it was given.
#[derive(Clone, Default)]
pub struct ShellLauncher {
    script: String,
    jobs: Arc<Mutex<Vec<RemuxJob>>>,
}

impl ShellLauncher {
    pub fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
            jobs: Arc::default(),
        }
    }

    pub fn jobs(&self) -> Vec<RemuxJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl ProcessLauncher for ShellLauncher {
    fn command(&self, job: &RemuxJob) -> Command {
        self.jobs.lock().unwrap().push(job.clone());
        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.script);
        command
    }
}

pub fn sample_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
