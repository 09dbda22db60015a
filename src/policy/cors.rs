use actix_cors::Cors;
use actix_web::http::{header::HeaderName, Method};

use crate::{config::PolicyConfig, models::request::EXPOSED_RESPONSE_HEADERS};

/// CORS for a player page hosted on another origin or port. `*` in the allow-list
/// sends a literal wildcard; otherwise only the listed origins are echoed back.
pub fn cors(policy: &PolicyConfig) -> Cors {
    let exposed = EXPOSED_RESPONSE_HEADERS
        .iter()
        .map(|h| HeaderName::from_static(*h))
        .collect::<Vec<_>>();

    let mut cors = Cors::default()
        .allowed_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_any_header()
        .expose_headers(exposed)
        .max_age(3600);

    if policy.allowed_origins.iter().any(|o| o.trim() == "*") {
        cors = cors.allow_any_origin().send_wildcard();
    } else {
        for origin in &policy.allowed_origins {
            cors = cors.allowed_origin(origin.trim());
        }
    }

    cors
}
