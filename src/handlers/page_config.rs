use axum::{Json, extract::State};

use crate::ServerState;
use crate::models::lens::PageConfig;

/// Bootstrap data for the UI: server time and default Prometheus settings.
pub async fn page_config(State(state): State<ServerState>) -> Json<PageConfig> {
    let server_settings = state.config.server_settings();
    Json(PageConfig {
        now: chrono::Utc::now().timestamp(),
        default_prometheus_url: server_settings.url.clone(),
        server_settings,
    })
}
