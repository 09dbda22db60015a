pub mod cors;
pub mod middleware;
pub mod rate_limit;

pub use cors::cors;
pub use middleware::RateLimitMiddleware;
pub use rate_limit::{RateDecision, RateLimiter};
