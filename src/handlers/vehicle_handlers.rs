//! HTTP handlers for `/api/users/{user_id}/vehicles` and the per-vehicle
//! image endpoints.
//!
//! Image bodies arrive as the multipart field `file` and are streamed to the
//! image store without buffering; downloads stream straight from disk.

use crate::{
    errors::AppError,
    models::vehicle::{NewVehicle, Vehicle, VehicleUpdate},
    services::{RegistryError, image_store::StoredImage, vehicle_service::ImageUpload},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Path, State,
        multipart::{Field, Multipart, MultipartError},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use serde::Serialize;
use std::io;
use tokio_util::io::ReaderStream;
use tracing::info;

/// Body returned by the upload and update image endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub message: String,
    pub vehicle_image: Option<String>,
    pub vehicle: Vehicle,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST `/api/users/{user_id}/vehicles`: batch-create vehicles for a user.
pub async fn create_vehicles(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(vehicles): Json<Vec<NewVehicle>>,
) -> Result<Json<Vec<Vehicle>>, AppError> {
    Ok(Json(state.vehicles.create_for_owner(user_id, vehicles).await?))
}

/// GET `/api/users/{user_id}/vehicles`
pub async fn list_vehicles(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<Vehicle>>, AppError> {
    Ok(Json(state.vehicles.list_for_owner(user_id).await?))
}

/// GET `/api/users/{user_id}/vehicles/{id}`
pub async fn get_vehicle(
    State(state): State<AppState>,
    Path((user_id, vehicle_id)): Path<(i64, i64)>,
) -> Result<Json<Vehicle>, AppError> {
    Ok(Json(state.vehicles.find_for_owner(vehicle_id, user_id).await?))
}

/// PUT `/api/users/{user_id}/vehicles/{id}`
pub async fn update_vehicle(
    State(state): State<AppState>,
    Path((user_id, vehicle_id)): Path<(i64, i64)>,
    Json(details): Json<VehicleUpdate>,
) -> Result<Json<Vehicle>, AppError> {
    Ok(Json(
        state
            .vehicles
            .update_vehicle(vehicle_id, user_id, details)
            .await?,
    ))
}

/// DELETE `/api/users/{user_id}/vehicles/{id}`
pub async fn delete_vehicle(
    State(state): State<AppState>,
    Path((user_id, vehicle_id)): Path<(i64, i64)>,
) -> Result<StatusCode, AppError> {
    if state.vehicles.delete_vehicle(vehicle_id, user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!(
            "vehicle {} not found for user {}",
            vehicle_id, user_id
        )))
    }
}

/// POST `/api/users/{user_id}/vehicles/{id}/upload-image`
pub async fn upload_vehicle_image(
    State(state): State<AppState>,
    Path((user_id, vehicle_id)): Path<(i64, i64)>,
    mut multipart: Multipart,
) -> Result<Json<ImageResponse>, AppError> {
    let vehicle = receive_image(
        &state,
        user_id,
        vehicle_id,
        &mut multipart,
        ImageAction::Upload,
    )
    .await?;

    Ok(Json(image_response("Image uploaded successfully", vehicle)))
}

/// PUT `/api/users/{user_id}/vehicles/{id}/update-image`
pub async fn update_vehicle_image(
    State(state): State<AppState>,
    Path((user_id, vehicle_id)): Path<(i64, i64)>,
    mut multipart: Multipart,
) -> Result<Json<ImageResponse>, AppError> {
    let vehicle = receive_image(
        &state,
        user_id,
        vehicle_id,
        &mut multipart,
        ImageAction::Replace,
    )
    .await?;

    Ok(Json(image_response("Image updated successfully", vehicle)))
}

/// GET `/api/users/{user_id}/vehicles/{id}/image`: stream the image inline.
pub async fn get_vehicle_image(
    State(state): State<AppState>,
    Path((user_id, vehicle_id)): Path<(i64, i64)>,
) -> Result<Response, AppError> {
    let image = state.vehicles.get_image(vehicle_id, user_id).await?;

    let mut headers = HeaderMap::new();
    set_image_headers(&mut headers, &image);
    let body = Body::from_stream(ReaderStream::new(image.file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = headers;
    Ok(response)
}

/// DELETE `/api/users/{user_id}/vehicles/{id}/delete-image`
pub async fn delete_vehicle_image(
    State(state): State<AppState>,
    Path((user_id, vehicle_id)): Path<(i64, i64)>,
) -> Result<Json<MessageResponse>, AppError> {
    if state.vehicles.delete_image(vehicle_id, user_id).await? {
        Ok(Json(MessageResponse {
            message: "Image deleted successfully.".into(),
        }))
    } else {
        Err(AppError::not_found(
            "Image not found or vehicle does not exist.",
        ))
    }
}

#[derive(Clone, Copy)]
enum ImageAction {
    Upload,
    Replace,
}

/// Find the `file` field and hand its stream to the vehicle service.
/// Other fields are skipped.
async fn receive_image(
    state: &AppState,
    user_id: i64,
    vehicle_id: i64,
    multipart: &mut Multipart,
    action: ImageAction,
) -> Result<Vehicle, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::new(e.status(), format!("Multipart error: {}", e.body_text())))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let upload = field_upload(field)?;
        let result = match action {
            ImageAction::Upload => {
                state
                    .vehicles
                    .upload_image(vehicle_id, user_id, upload)
                    .await
            }
            ImageAction::Replace => {
                state
                    .vehicles
                    .update_image(vehicle_id, user_id, upload)
                    .await
            }
        };
        return result.map_err(upload_error);
    }
    Err(AppError::bad_request("Missing 'file' field"))
}

fn field_upload(
    field: Field<'_>,
) -> Result<ImageUpload<impl Stream<Item = io::Result<Bytes>> + '_>, AppError> {
    let original_filename = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request("File field must have a filename"))?;
    let content_type = field.content_type().map(str::to_string);

    Ok(ImageUpload {
        original_filename,
        content_type,
        stream: field.map_err(io::Error::other),
    })
}

/// Errors raised by the multipart body itself (client went away, body limit
/// hit) keep the status axum assigns to them instead of becoming a 500.
fn upload_error(err: RegistryError) -> AppError {
    if let RegistryError::Io(io_err) = &err {
        if let Some(multipart_err) = io_err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
        {
            return AppError::new(
                multipart_err.status(),
                format!("Multipart error: {}", multipart_err.body_text()),
            );
        }
    }
    err.into()
}

fn image_response(action: &str, vehicle: Vehicle) -> ImageResponse {
    let filename = vehicle.vehicle_image.clone().unwrap_or_default();
    info!("{} for vehicle {}: {}", action, vehicle.id, filename);
    ImageResponse {
        message: format!("{}: {}", action, filename),
        vehicle_image: vehicle.vehicle_image.clone(),
        vehicle,
    }
}

fn set_image_headers(headers: &mut HeaderMap, image: &StoredImage) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&image.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(image.size_bytes));

    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition_value(&image.filename))
            .unwrap_or_else(|_| HeaderValue::from_static("inline")),
    );
}

/// `inline` disposition for `filename`. Names that are not plain ASCII get
/// an ASCII-only `filename` plus an RFC 5987 `filename*` carrying the UTF-8
/// name.
fn content_disposition_value(filename: &str) -> String {
    let plain = filename
        .chars()
        .all(|c| (c.is_ascii_graphic() || c == ' ') && !matches!(c, '"' | '\\'));
    if plain {
        return format!("inline; filename=\"{}\"", filename);
    }

    let ascii_safe: String = filename
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && !matches!(c, '"' | '\\'))
        .collect();
    let ascii_name = match ascii_safe.trim() {
        "" => "image",
        name => name,
    };

    let encoded: String = filename
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => String::from(b as char),
            _ => format!("%{b:02X}"),
        })
        .collect();

    format!("inline; filename=\"{ascii_name}\"; filename*=UTF-8''{encoded}")
}
