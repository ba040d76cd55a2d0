pub mod config;
pub mod explain;
pub mod handlers;
pub mod models;
pub mod promapi;
pub mod promql;
pub mod state;

use std::sync::Arc;

use config::LensConfig;
use promapi::PromApi;

#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<LensConfig>,
    pub prom: Arc<PromApi>,
}
