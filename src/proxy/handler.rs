use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, HttpResponseBuilder};
use reqwest::Method;
use tracing::info;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{ProxyQuery, ProxyRequest},
    proxy::{
        relay::{origin_referer, RelayResponse},
        remux::RemuxPipeline,
        router::Route,
        Gateway,
    },
};

pub async fn proxy_stream_get(
    req: HttpRequest,
    query: web::Query<ProxyQuery>,
    gateway: web::Data<Gateway>,
) -> AppResult<HttpResponse> {
    proxy_stream(req, query.into_inner(), gateway, Method::GET).await
}

pub async fn proxy_stream_head(
    req: HttpRequest,
    query: web::Query<ProxyQuery>,
    gateway: web::Data<Gateway>,
) -> AppResult<HttpResponse> {
    proxy_stream(req, query.into_inner(), gateway, Method::HEAD).await
}

async fn proxy_stream(
    req: HttpRequest,
    query: ProxyQuery,
    gateway: web::Data<Gateway>,
    method: Method,
) -> AppResult<HttpResponse> {
    let request = ProxyRequest::from_parts(query, req.headers())?;
    let route = gateway.router.classify(&request)?;
    info!(
        "{} {} via {:?} path (range: {:?}, referer: {:?})",
        method, request.target, route, request.range, request.referer
    );

    match route {
        Route::Direct => {
            let relay = gateway.relay.open(&request, method).await?;
            direct_response(relay)
        }
        Route::Remux => {
            let mut builder = HttpResponse::Ok();
            for (name, value) in RemuxPipeline::response_headers() {
                builder.insert_header((name, value));
            }
            if method == Method::HEAD {
                return Ok(builder.finish());
            }

            let job = gateway.remux.job(
                request.target.clone(),
                gateway.relay.user_agent(&request),
                origin_referer(&request.target),
            );
            let body = gateway.remux.open(job).await?;
            Ok(builder.streaming(body))
        }
    }
}

fn direct_response(relay: RelayResponse) -> AppResult<HttpResponse> {
    let RelayResponse {
        status,
        headers,
        body,
    } = relay;

    let status = StatusCode::from_u16(status.as_u16()).map_err(|_| {
        AppError::UpstreamUnreachable(format!("upstream sent invalid status {}", status))
    })?;
    let mut builder = HttpResponseBuilder::new(status);

    for (name, value) in headers {
        if name == "content-length" {
            // A streamed body is sent chunked unless the length is pinned explicitly.
            if let Ok(len) = value.parse::<u64>() {
                builder.no_chunking(len);
            }
            continue;
        }
        builder.insert_header((name, value));
    }

    Ok(builder.streaming(body))
}

/// Static hints for the browser player, including where DRM licenses come from.
/// The gateway itself never contacts the license server.
pub async fn player_config(config: web::Data<Config>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "proxy_endpoint": "/proxy",
        "drm_license_url": config.player.drm_license_url,
    }))
}
