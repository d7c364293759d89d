//! HTTP handlers for `/api/users`.

use crate::{
    errors::AppError,
    models::user::{NewUser, User, UserUpdate},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// GET `/api/users`
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.users.list_users().await?))
}

/// GET `/api/users/{user_id}`
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.find_user(user_id).await?))
}

/// POST `/api/users/batch`: create several users in one transaction.
pub async fn create_users(
    State(state): State<AppState>,
    Json(users): Json<Vec<NewUser>>,
) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.users.create_users(users).await?))
}

/// PUT `/api/users/{user_id}`
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(details): Json<UserUpdate>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.update_user(user_id, details).await?))
}

/// DELETE `/api/users/{user_id}`: cascades to owned vehicles and their images.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    if state.users.delete_user(user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("user {} not found", user_id)))
    }
}
