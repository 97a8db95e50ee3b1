pub mod config;
pub mod db;
pub mod dtos;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod service;

use config::Config;
use service::lifecycle_service::LifecycleService;

#[derive(Clone)]
pub struct AppState {
    pub env: Config,
    pub lifecycle: LifecycleService,
}
