//! HTTP surface of Crosspost
//!
//! The binary in `main.rs` wires configuration, background workers and the
//! scheduler around [`router`]; tests drive the router directly.

pub mod context;
pub mod error;
pub mod routes;
pub mod uploads;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;
use libcrosspost::{Config, CrosspostService, OAuthService};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::uploads::{UploadStore, MAX_BATCH_IMAGES, MAX_IMAGE_BYTES};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: CrosspostService,
    pub oauth: Arc<OAuthService>,
    pub config: Arc<Config>,
    pub uploads: UploadStore,
}

impl AppState {
    pub fn new(service: CrosspostService, oauth: Arc<OAuthService>, config: Config) -> Self {
        let uploads = UploadStore::new(
            config.expanded_uploads_dir(),
            config.server.backend_url.clone(),
        );
        Self {
            service,
            oauth,
            config: Arc::new(config),
            uploads,
        }
    }
}

/// Build the full application router
pub fn router(state: AppState) -> Router {
    let images = Router::new()
        .route("/images", post(routes::images::upload_one))
        .route("/images/batch", post(routes::images::upload_batch))
        // Multipart framing overhead on top of the raw image bytes
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES * MAX_BATCH_IMAGES + 64 * 1024));

    Router::new()
        .route("/health", get(routes::health::health))
        // OAuth
        .route("/oauth/{platform}/start", get(routes::oauth::start))
        .route("/oauth/{platform}/callback", get(routes::oauth::callback))
        // Accounts
        .route("/accounts", get(routes::accounts::list))
        .route("/accounts/{platform}", delete(routes::accounts::disconnect))
        // Posts
        .route("/posts", post(routes::posts::create).get(routes::posts::list))
        .route(
            "/posts/{id}",
            put(routes::posts::update).delete(routes::posts::remove),
        )
        .merge(images)
        .nest_service(
            "/uploads/social-posts",
            ServeDir::new(state.uploads.dir().to_path_buf()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
