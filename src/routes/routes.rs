//! Route table for the upload pipeline.
//!
//! ## Structure
//! - **Uploads**
//!   - `POST   /upload`: moderate an image, answer with an upload token
//!
//! - **Entity image slots**
//!   - `PUT    /entities/{entity_type}/{entity_id}`: register an entity
//!   - `POST   /entities/{entity_type}/{entity_id}/image`: attach (multipart or token)
//!   - `GET    /entities/{entity_type}/{entity_id}/image`: current image
//!   - `DELETE /entities/{entity_type}/{entity_id}/image`: clear the slot
//!
//! - **Assets**
//!   - `GET    /assets/{asset_id}`: download by id

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{
            attach_image, delete_entity_image, get_asset, get_entity_image, register_entity,
            upload_image,
        },
    },
    services::coordinator::Coordinator,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Room for multipart boundaries and the non-file fields on top of the image.
pub const MULTIPART_ENVELOPE_BYTES: usize = 64 * 1024;

/// Build the router. Handlers share the `Coordinator` as state.
///
/// The body limit is the largest per-type ceiling plus the multipart
/// envelope; the exact per-type ceiling is enforced while reading the part.
pub fn routes(body_limit: usize) -> Router<Coordinator> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload", post(upload_image))
        .route("/entities/{entity_type}/{entity_id}", put(register_entity))
        .route(
            "/entities/{entity_type}/{entity_id}/image",
            post(attach_image)
                .get(get_entity_image)
                .delete(delete_entity_image),
        )
        .route("/assets/{asset_id}", get(get_asset))
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Router with state attached, sized from the coordinator's limits.
pub fn app(coordinator: Coordinator) -> Router {
    let body_limit = coordinator.limits().largest() + MULTIPART_ENVELOPE_BYTES;
    routes(body_limit).with_state(coordinator)
}
