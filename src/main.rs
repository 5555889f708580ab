use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use testbridge_agent::handlers::{
    health_check, run_cancel_handler, run_relay_handler, run_stream_handler,
};
use testbridge_agent::init::{AppState, app_init};

fn create_app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/runs/execute",
            axum::routing::post(run_stream_handler),
        )
        .route(
            "/api/runs/stream",
            axum::routing::post(run_relay_handler),
        )
        .route(
            "/api/runs/{request_id}",
            axum::routing::delete(run_cancel_handler),
        )
        .route("/health", axum::routing::get(health_check))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("🚀 Starting Browser Test Bridge...");
    dotenv::dotenv().ok();
    let (config, state) = app_init().await?;
    log::info!("✅ Application state initialized");
    let app = create_app_router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("");
    log::info!("🎉 Server started!");
    log::info!("📍 http://{}", addr);
    log::info!("📡 Execute: http://{}/api/runs/execute", addr);
    log::info!("🔀 Relay: http://{}/api/runs/stream", addr);
    log::info!("❤️  Health: http://{}/health", addr);
    log::info!("");
    log::info!("🧪 Backend: {}", config.backend_url);
    log::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
