pub mod config;
pub mod error;
pub mod models;
pub mod policy;
pub mod proxy;
pub mod server;
