//! The gateway HTTP surface: router assembly and request plumbing.

use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;

use crate::{livy::LivyState, service::ApplicationService};

pub mod applications;
pub mod auth;
pub mod error;

pub use error::{ApiError, LivyApiError};

use auth::AuthChain;

/// Shared state of the primary application surface.
#[derive(Clone)]
pub struct ApiState {
    pub service: ApplicationService,
    pub default_log_lines: i64,
}

/// Assembles the full gateway router. The numeric-id surface is only mounted
/// when its backing store is configured. `/health` stays outside the
/// authentication chain.
pub fn router(api: ApiState, livy: Option<LivyState>, chain: Arc<AuthChain>) -> Router {
    let applications = Router::new()
        .route(
            "/",
            get(applications::list_applications).post(applications::create_application),
        )
        .route(
            "/{id}",
            get(applications::get_application).delete(applications::delete_application),
        )
        .route("/{id}/status", get(applications::get_status))
        .route("/{id}/logs", get(applications::get_logs))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&chain),
            auth::authenticate_api,
        ))
        .with_state(api);

    let mut router = Router::new().nest("/api/v1/applications", applications);

    if let Some(livy) = livy {
        let batches = Router::new()
            .route(
                "/",
                get(crate::livy::handlers::list_batches).post(crate::livy::handlers::create_batch),
            )
            .route(
                "/{batchId}",
                get(crate::livy::handlers::get_batch)
                    .delete(crate::livy::handlers::delete_batch),
            )
            .route("/{batchId}/state", get(crate::livy::handlers::get_state))
            .route("/{batchId}/log", get(crate::livy::handlers::get_log))
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&chain),
                auth::authenticate_livy,
            ))
            .with_state(livy);

        router = router.nest("/api/livy/batches", batches);
    }

    router
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
}
