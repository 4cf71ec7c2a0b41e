mod analysis;
mod batch;
mod config;
mod db;
mod error;
mod feed;
mod llm;
mod metrics;
mod models;
mod routes;
mod scheduler;
mod state;
mod tagging;

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::AppConfig;
use llm::DeepSeekClient;
use routes::api_routes;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "biorxiv_daily=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();
    if config.llm.api_key.is_none() {
        tracing::warn!("DEEPSEEK_API_KEY not set; analysis endpoints will fail");
    }

    // Database setup
    let pool = db::init_db(&config.database_url).await?;
    tracing::info!("Database initialized");

    let http = reqwest::Client::builder().build()?;
    let llm = Arc::new(DeepSeekClient::new(http.clone(), config.llm.clone()));
    let state = AppState::new(pool, config, http, llm);

    if let Some(hour) = state.config.feed_schedule_hour_utc {
        scheduler::spawn_daily_ingest(state.clone(), hour);
    }

    // CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let addr = state.config.bind_addr.clone();
    let assets_dir = state.config.frontend_dist.join("assets");

    // Build the app
    let app = Router::new()
        .merge(api_routes())
        .nest_service("/assets", ServeDir::new(assets_dir))
        .fallback(serve_spa)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Run the server
    tracing::info!("Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_spa(State(state): State<AppState>) -> impl IntoResponse {
    let index_path = state.config.frontend_dist.join("index.html");

    match tokio::fs::read_to_string(&index_path).await {
        Ok(html) => Html(html).into_response(),
        Err(_) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({
                "message": "Welcome to the bioRxiv Daily API",
                "health": "/api/health"
            })),
        )
            .into_response(),
    }
}
