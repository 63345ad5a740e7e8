use axum::Router;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/records", get(handlers::list_records))
        .route(
            "/api/records/{kind}/{id}/rotate",
            post(handlers::rotate_now),
        )
        .route(
            "/api/records/{kind}/{id}/domains",
            get(handlers::list_domains).post(handlers::add_domain),
        )
        .route(
            "/api/records/{kind}/{id}/domains/{domain_id}",
            axum::routing::delete(handlers::remove_domain),
        )
        .route("/api/settings/interval", put(handlers::set_interval))
        .route("/api/settings/port-range", put(handlers::set_port_range))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
