//! A vehicle owned by a user, with an optional attached image.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A vehicle record.
///
/// `vehicle_image` holds the filename of the attached image inside the
/// upload directory, or `None` when no image is attached. Only the image
/// operations on `VehicleService` change it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: i64,

    /// Unique license plate, e.g. "B 888 ARS".
    pub license_plate: String,

    pub registration_id: String,

    pub brand: String,

    pub model: String,

    /// Owning user (`vehicles.user_id`).
    pub owner_id: i64,

    pub vehicle_image: Option<String>,
}

/// Fields accepted when creating a vehicle. The owner comes from the request
/// path, and image references supplied by clients are ignored.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewVehicle {
    pub license_plate: String,
    pub registration_id: String,
    pub brand: String,
    pub model: String,
}

pub type VehicleUpdate = NewVehicle;

impl NewVehicle {
    pub fn blank_field(&self) -> Option<&'static str> {
        [
            ("licensePlate", &self.license_plate),
            ("registrationId", &self.registration_id),
            ("brand", &self.brand),
            ("model", &self.model),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
    }
}
