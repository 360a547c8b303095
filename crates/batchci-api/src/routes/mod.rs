//! API routes.

pub mod admin;
pub mod api;
pub mod builds;
pub mod health;
pub mod webhooks;

use crate::AppState;
use axum::Router;

/// Build the main router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/build", builds::router())
        .nest("/test", tests::router())
        .nest("/api", api::router())
        .nest("/admin", admin::router())
        .merge(health::router())
        .with_state(state)
}
