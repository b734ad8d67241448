//! HTTP server initialization and routing

use axum::{routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::approvals::configure_approvals_routes;
use crate::attachments::configure_attachments_routes;
use crate::auth::configure_auth_routes;
use crate::categories::configure_categories_routes;
use crate::documents::configure_documents_routes;
use crate::reviews::configure_reviews_routes;
use crate::shared::state::AppState;
use crate::viewers::configure_viewers_routes;

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(configure_auth_routes())
        .merge(configure_documents_routes())
        .merge(configure_reviews_routes())
        .merge(configure_categories_routes())
        .merge(configure_viewers_routes())
        .merge(configure_approvals_routes())
        .merge(configure_attachments_routes())
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    )
    .parse()?;

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Review server listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
