use std::sync::Arc;
use std::time::Duration;

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpResponse};
use tracing::debug;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    policy::{self, RateLimitMiddleware, RateLimiter},
    proxy::{handler, Gateway},
};

/// Everything a worker needs, built once at startup. The rate limiter is the only
/// mutable state and is shared by all workers through the `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub gateway: Gateway,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, gateway: Gateway, limiter: Arc<RateLimiter>) -> Self {
        Self {
            config,
            gateway,
            limiter,
        }
    }

    pub fn from_config(config: Config) -> AppResult<Self> {
        let gateway = Gateway::from_config(&config)?;
        let limiter = Arc::new(RateLimiter::new(
            config.policy.rate_limit_requests,
            config.policy.rate_limit_window(),
        ));
        Ok(Self::new(config, gateway, limiter))
    }
}

pub fn build_app(
    state: &AppState,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let rate_limit = RateLimitMiddleware::new(
        Arc::clone(&state.limiter),
        state.config.policy.trust_forwarded_for,
    );

    App::new()
        .wrap(policy::cors(&state.config.policy))
        // FastAPI-style access logs: IP:PORT - "METHOD PATH HTTP/VERSION" STATUS_CODE
        .wrap(Logger::new("%a - \"%r\" %s %b %Dms"))
        .app_data(web::Data::new(state.gateway.clone()))
        .app_data(web::Data::new(state.config.clone()))
        .app_data(web::QueryConfig::default().error_handler(|err, _req| {
            AppError::InvalidRequest(format!("malformed query string: {}", err)).into()
        }))
        .service(
            web::scope("/proxy")
                .wrap(rate_limit)
                .route("", web::get().to(handler::proxy_stream_get))
                .route("", web::head().to(handler::proxy_stream_head)),
        )
        .service(web::scope("/player").route("/config", web::get().to(handler::player_config)))
        .service(web::scope("/health").route("", web::get().to(|| async { "OK" })))
        .default_service(web::route().to(|| async {
            HttpResponse::NotFound().json(serde_json::json!({
                "error": "Not Found"
            }))
        }))
}

/// Periodically forgets clients whose allowance has fully refilled.
pub async fn sweep_rate_limits(limiter: Arc<RateLimiter>) {
    let mut interval = tokio::time::interval(limiter.window().max(Duration::from_secs(1)));
    loop {
        interval.tick().await;
        let purged = limiter.purge_expired();
        if purged > 0 {
            debug!(
                "Purged {} idle rate-limit entries, {} clients tracked",
                purged,
                limiter.tracked_clients()
            );
        }
    }
}
