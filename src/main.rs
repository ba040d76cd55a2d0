use axum::{Router, routing::get, routing::post};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use promlens::ServerState;
use promlens::config::LensConfig;
use promlens::handlers;
use promlens::promapi::PromApi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("promlens=debug,tower_http=debug")
        }))
        .init();

    let config_path =
        std::env::var("PROMLENS_CONFIG").unwrap_or_else(|_| "./promlens.toml".to_string());
    let config = LensConfig::load(&config_path)?.with_env_overrides();

    let prom = PromApi::new(
        config.server_settings(),
        "",
        Duration::from_secs(config.prometheus.timeout_secs),
    )?;
    tracing::info!(
        "querying Prometheus at {} ({:?} access)",
        config.prometheus.url,
        config.prometheus.access
    );

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    let state = ServerState {
        config: Arc::new(config),
        prom: Arc::new(prom),
    };

    let app = Router::new()
        // Expression tooling
        .route(
            "/api/parse",
            get(handlers::parse::parse_query).post(handlers::parse::parse_form),
        )
        .route("/api/format", post(handlers::format::format_expr))
        .route("/api/annotations", post(handlers::annotations::node_annotations))
        .route("/api/explain/binary", post(handlers::explain::explain_binary))
        // UI bootstrap
        .route("/api/page_config", get(handlers::page_config::page_config))
        // Health
        .route("/healthz", get(handlers::health::healthz))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("promlens listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
