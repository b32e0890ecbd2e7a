pub mod api;
pub mod auth;
pub mod backend;
pub mod cli;
pub mod config;
pub mod db;
pub mod device;
pub mod listing;
pub mod ui;
pub mod upload;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::backend::Backend;

pub struct AppState {
    pub config: Config,
    pub backend: Arc<dyn Backend>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            config,
            backend,
            rate_limiter,
        }
    }
}
