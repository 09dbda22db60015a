pub mod container;
pub mod handler;
pub mod relay;
pub mod remux;
pub mod router;
pub mod stream;
pub mod upstream;

use std::sync::Arc;

pub use handler::{player_config, proxy_stream_get, proxy_stream_head};
pub use relay::{RelayContext, RelayPipeline};
pub use remux::{FfmpegLauncher, ProcessLauncher, RemuxJob, RemuxPipeline};
pub use router::{ProviderFilter, RequestRouter, Route};
pub use stream::ResponseStream;
pub use upstream::{HttpFetcher, UpstreamFetch};

use crate::{config::Config, error::AppResult};

/// Router plus both pipelines, built once from an explicit configuration and
/// shared read-only by every worker.
#[derive(Clone)]
pub struct Gateway {
    pub router: RequestRouter,
    pub relay: RelayPipeline,
    pub remux: RemuxPipeline,
}

impl Gateway {
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn UpstreamFetch>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let providers = ProviderFilter::new(&config.policy.excluded_providers);
        Self {
            router: RequestRouter::new(providers.clone(), &config.remux.extensions),
            relay: RelayPipeline::new(fetcher, config.proxy.clone()).with_providers(providers),
            remux: RemuxPipeline::new(
                launcher,
                config.remux.clone(),
                config.proxy.idle_timeout(),
            ),
        }
    }

    /// Production wiring: reqwest upstream client and ffmpeg.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config.proxy)?);
        let launcher = Arc::new(FfmpegLauncher::new(config.remux.ffmpeg_path.clone()));
        Ok(Self::new(config, fetcher, launcher))
    }
}
