use crate::pets_logic::state::AppState;
use axum::{
    Json, Router,
    extract::State,
    http::Method,
    response::IntoResponse,
    routing::get,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub fn router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        .route("/recent-pets", get(recent_pets_handler))
        .route("/all-pets", get(all_pets_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(app_state)
}

pub async fn run(port: u16, app_state: AppState, shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr).await?;
    log::info!("Downstream server listening on {}", addr);
    serve(listener, app_state, shutdown).await
}

/// Serves the read API on an already bound listener until shutdown.
pub async fn serve(
    listener: TcpListener,
    app_state: AppState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
        })
        .await
}

async fn recent_pets_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.recent(chrono::Utc::now()))
}

async fn all_pets_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.all())
}

async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stats())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health())
}
