//! Route configuration.

use crate::auth::admin_auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let package_routes = Router::new()
        // Catalog browsing
        .route("/packages", get(handlers::list_packages))
        .route("/packages/{name}", get(handlers::get_package))
        // Package commands (info, download)
        .route("/packages/{name}/{command}", get(handlers::package_command));

    // Build base router; health is not admission-controlled
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(package_routes);

    if state.config.admin.is_some() {
        let admin_routes = Router::new()
            .route(
                "/admin/clients/blocked",
                get(handlers::list_blocked_clients),
            )
            .route(
                "/admin/clients/{client}/block",
                put(handlers::block_client).delete(handlers::unblock_client),
            )
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                admin_auth_middleware,
            ));
        router = router.merge(admin_routes);
    }

    // Conditionally add metrics endpoint based on config.
    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    // See crate::metrics module documentation for details.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
