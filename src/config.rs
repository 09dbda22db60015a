use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const LIST_KEYS: &[&str] = &[
    "policy.allowed_origins",
    "policy.excluded_providers",
    "remux.extensions",
];

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    pub connect_timeout: u64,
    /// Seconds to wait for upstream response headers.
    pub response_timeout: u64,
    /// Longest allowed gap between two upstream body chunks, in seconds.
    pub idle_timeout: u64,
    pub max_redirects: usize,
    pub verify_ssl: bool,
    pub user_agent: String,
    pub forward_user_agent: bool,
    pub buffer_size: usize,
    #[serde(default)]
    pub upstream_proxy: Option<String>,
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemuxConfig {
    pub ffmpeg_path: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub native_rate: bool,
    pub first_byte_timeout: u64,
    pub chunk_size: usize,
    pub extensions: Vec<String>,
}

impl RemuxConfig {
    pub fn first_byte_timeout(&self) -> Duration {
        Duration::from_secs(self.first_byte_timeout)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    pub rate_limit_requests: u32,
    pub rate_limit_window: u64,
    pub allowed_origins: Vec<String>,
    pub excluded_providers: Vec<String>,
    pub trust_forwarded_for: bool,
}

impl PolicyConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PlayerConfig {
    #[serde(default)]
    pub drm_license_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub proxy: ProxyConfig,
    pub remux: RemuxConfig,
    pub policy: PolicyConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8888)?
            .set_default("server.workers", 4)?
            .set_default("proxy.connect_timeout", 10)?
            .set_default("proxy.response_timeout", 30)?
            .set_default("proxy.idle_timeout", 60)?
            .set_default("proxy.max_redirects", 10)?
            .set_default("proxy.verify_ssl", false)?
            .set_default("proxy.user_agent", DEFAULT_USER_AGENT)?
            .set_default("proxy.forward_user_agent", false)?
            .set_default("proxy.buffer_size", 65536)?
            .set_default("remux.ffmpeg_path", "ffmpeg")?
            .set_default("remux.audio_codec", "aac")?
            .set_default("remux.audio_bitrate", "192k")?
            .set_default("remux.native_rate", true)?
            .set_default("remux.first_byte_timeout", 30)?
            .set_default("remux.chunk_size", 65536)?
            .set_default(
                "remux.extensions",
                vec!["mkv", "mk3d", "avi", "divx", "flv", "f4v", "wmv", "asf"],
            )?
            .set_default("policy.rate_limit_requests", 1200)?
            .set_default("policy.rate_limit_window", 60)?
            .set_default("policy.allowed_origins", vec!["*"])?
            .set_default(
                "policy.excluded_providers",
                vec![
                    "all://youtube.com",
                    "all://*.youtube.com",
                    "all://youtu.be",
                    "all://*.youtube-nocookie.com",
                    "all://vimeo.com",
                    "all://*.vimeo.com",
                    "all://*.dailymotion.com",
                ],
            )?
            .set_default("policy.trust_forwarded_for", false)?;

        // Add configuration from file
        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            let path = Path::new(&config_path);
            if path.exists() {
                builder = builder.add_source(config::File::with_name(&config_path));
            } else {
                warn!("Config file not found at {}", config_path);
            }
        }

        // Add configuration from environment
        let mut environment = config::Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true)
            .list_separator(",");
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }
        builder = builder.add_source(environment);

        let config = builder.build()?;
        config.try_deserialize()
    }
}
