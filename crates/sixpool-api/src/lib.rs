pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// The RPC surface, bound at construction. No authentication — this
/// listens on a trusted interface only.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/stats", get(handlers::handle_stats))
        .route("/spawn", get(handlers::handle_spawn))
        .route("/spawns", get(handlers::handle_spawns))
        .route("/check", post(handlers::handle_check))
        .route("/checks", post(handlers::handle_checks))
        .route("/pick", get(handlers::handle_pick))
        .route("/picks", get(handlers::handle_picks))
        .route("/report", post(handlers::handle_report))
        .route("/reports", post(handlers::handle_reports))
        .route("/save", post(handlers::handle_save))
        .route("/flush", post(handlers::handle_flush))
        .with_state(state)
        .layer(cors)
}

pub async fn serve(state: ApiState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "RPC surface listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
