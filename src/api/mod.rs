mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::cluster::{Coordinator, ENTITY_PATH, STATUS_PATH};
use crate::config::ClusterConfig;
use crate::db::Database;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub coordinator: Coordinator,
}

pub fn create_router(state: AppState, config: &ClusterConfig) -> Router {
    Router::new()
        .route(STATUS_PATH, get(handlers::status))
        .route(
            ENTITY_PATH,
            get(handlers::get_entity)
                .put(handlers::put_entity)
                .delete(handlers::delete_entity),
        )
        .fallback(|| async { (StatusCode::BAD_REQUEST, "Unknown path") })
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(config.max_value_bytes)),
        )
        .with_state(state)
}
