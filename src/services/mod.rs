//! Domain services: entity persistence, the vehicle image lifecycle, and the
//! on-disk image namespace.

pub mod image_store;
pub mod user_service;
pub mod vehicle_locks;
pub mod vehicle_service;

use image_store::ImageStoreError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error("vehicle {vehicle_id} not found for user {owner_id}")]
    VehicleNotFound { vehicle_id: i64, owner_id: i64 },
    #[error("image not found for vehicle {0}")]
    ImageNotFound(i64),
    #[error("unsupported media type `{0}`: only JPEG, PNG, and WEBP images are allowed")]
    UnsupportedMediaType(String),
    #[error("upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(sqlx::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            RegistryError::Conflict(unique_violation_message(&err))
        } else {
            RegistryError::Database(err)
        }
    }
}

impl From<ImageStoreError> for RegistryError {
    fn from(err: ImageStoreError) -> Self {
        match err {
            ImageStoreError::InvalidFilename(name) => {
                RegistryError::Validation(format!("invalid image filename `{}`", name))
            }
            ImageStoreError::TooLarge { limit } => RegistryError::PayloadTooLarge { limit },
            ImageStoreError::Io(err) => RegistryError::Io(err),
            // Callers that can attribute a missing file to a vehicle map this
            // themselves; anything reaching here is a plain I/O miss.
            ImageStoreError::NotFound(name) => RegistryError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("image file `{}` not found", name),
            )),
        }
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn unique_violation_message(err: &sqlx::Error) -> String {
    let message = match err {
        sqlx::Error::Database(db_err) => db_err.message().to_string(),
        other => other.to_string(),
    };
    if message.contains("users.ktp_number") {
        "a user with this KTP number already exists".into()
    } else if message.contains("vehicles.license_plate") {
        "a vehicle with this license plate already exists".into()
    } else {
        format!("duplicate value: {}", message)
    }
}

/// Shared schema bootstrap used by the binary and by tests.
pub const SCHEMA_SQL: &str = include_str!("../../migrations/0001_init.sql");
