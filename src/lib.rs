//! Per-host gateway exposing vnStat traffic counters over an authenticated
//! JSON API, plus the client used to poll it.

pub mod auth;
pub mod cli;
pub mod config;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod normalize;
pub mod server;

pub use config::{Config, Settings};
pub use error::GatewayError;
pub use gateway::{AppState, build_router};
