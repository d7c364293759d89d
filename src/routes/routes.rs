//! Defines routes for the customer registry.
//!
//! ## Structure
//! - **Users**
//!   - `GET    /api/users`: list users
//!   - `POST   /api/users/batch`: create users
//!   - `GET    /api/users/{user_id}`: fetch one
//!   - `PUT    /api/users/{user_id}`: replace fields
//!   - `DELETE /api/users/{user_id}`: delete (cascades to vehicles)
//!
//! - **Vehicles** (always scoped by owner)
//!   - `GET    /api/users/{user_id}/vehicles`: list
//!   - `POST   /api/users/{user_id}/vehicles`: batch create
//!   - `GET    /api/users/{user_id}/vehicles/{id}`: fetch one
//!   - `PUT    /api/users/{user_id}/vehicles/{id}`: replace fields
//!   - `DELETE /api/users/{user_id}/vehicles/{id}`: delete
//!
//! - **Vehicle image**
//!   - `POST   .../vehicles/{id}/upload-image`: multipart `file`
//!   - `GET    .../vehicles/{id}/image`: inline download
//!   - `DELETE .../vehicles/{id}/delete-image`
//!   - `PUT    .../vehicles/{id}/update-image`: multipart `file`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        user_handlers::{create_users, delete_user, get_user, list_users, update_user},
        vehicle_handlers::{
            create_vehicles, delete_vehicle, delete_vehicle_image, get_vehicle, get_vehicle_image,
            list_vehicles, update_vehicle, update_vehicle_image, upload_vehicle_image,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Build and return the router for all registry routes.
///
/// Image upload routes accept bodies up to `max_upload_bytes` plus multipart
/// framing; the image store enforces the exact file limit.
pub fn routes(max_upload_bytes: u64) -> Router<AppState> {
    let upload_limit = usize::try_from(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES))
        .unwrap_or(usize::MAX);

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Users
        .route("/api/users", get(list_users))
        .route("/api/users/batch", post(create_users))
        .route(
            "/api/users/{user_id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        // Vehicles
        .route(
            "/api/users/{user_id}/vehicles",
            get(list_vehicles).post(create_vehicles),
        )
        .route(
            "/api/users/{user_id}/vehicles/{id}",
            get(get_vehicle).put(update_vehicle).delete(delete_vehicle),
        )
        // Vehicle image
        .route(
            "/api/users/{user_id}/vehicles/{id}/upload-image",
            post(upload_vehicle_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/users/{user_id}/vehicles/{id}/update-image",
            put(update_vehicle_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/users/{user_id}/vehicles/{id}/image",
            get(get_vehicle_image),
        )
        .route(
            "/api/users/{user_id}/vehicles/{id}/delete-image",
            delete(delete_vehicle_image),
        )
}
