//! linkcheck-api — REST API for linkcheck.
//!
//! Provides axum route handlers for submitting link-check jobs, reading
//! their results, and tuning the runtime settings. Everything under
//! `/api/v1` requires the shared key in the `Authorization` header.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/accounts/{owner}/jobs` | List an owner's jobs |
//! | POST | `/api/v1/accounts/{owner}/jobs` | Create a job |
//! | GET | `/api/v1/accounts/{owner}/jobs/{id}` | Job status and failures |
//! | DELETE | `/api/v1/accounts/{owner}/jobs/{id}` | Delete a job |
//! | GET | `/api/v1/settings` | Current settings |
//! | PUT | `/api/v1/settings` | Partially update settings |
//! | GET | `/healthz` | Liveness, no key required |

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use linkcheck_engine::JobService;

/// Largest accepted request body. A full 15,000-URL job with long landing
/// page URLs runs well past axum's 2 MB default.
pub const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<JobService>,
    /// Skip the shared-key check (local development only).
    pub dev_mode: bool,
}

/// Build the complete API router.
pub fn build_router(service: Arc<JobService>, dev_mode: bool) -> Router {
    let api_state = ApiState { service, dev_mode };

    let api_routes = Router::new()
        .route(
            "/accounts/{owner}/jobs",
            get(handlers::list_jobs).post(handlers::create_job),
        )
        .route(
            "/accounts/{owner}/jobs/{id}",
            get(handlers::get_job).delete(handlers::delete_job),
        )
        .route(
            "/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            api_state.clone(),
            auth::require_shared_key,
        ))
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
