pub mod request;

pub use request::{ProxyQuery, ProxyRequest};
