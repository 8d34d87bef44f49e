//! Axum router wiring: the generic data/call path plus operational endpoints.

use axum::extract::DefaultBodyLimit;
use axum::{routing::get, Router};

use crate::{app_state::AppState, http::handlers, ops};

pub fn build_router(state: AppState) -> Router {
    let path = state.cfg().gateway.path.clone();
    let body_limit = state.cfg().gateway.max_body_bytes;
    Router::new()
        .route(
            &path,
            get(handlers::get_data)
                .put(handlers::put_data)
                .delete(handlers::delete_data)
                .post(handlers::post_call),
        )
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
