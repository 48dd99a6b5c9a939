//! HTTP control surface over the sync engine

mod routes;
mod websocket;

pub use routes::AppError;

use crate::AppState;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", routes::api_routes())
        .route("/ws", axum::routing::get(websocket::ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Run the web server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let settings = state.settings.read().clone();
    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    let app = router(state);

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
