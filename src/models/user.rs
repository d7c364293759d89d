//! A registered customer and the payloads used to create or change one.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A customer who owns zero or more vehicles.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Database-assigned identifier.
    pub id: i64,

    pub name: String,

    pub address: String,

    pub birth_date: NaiveDate,

    /// National identity card number, unique across users.
    pub ktp_number: String,
}

/// Fields accepted when creating a user. Also used as the full replacement
/// body for updates.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub address: String,
    pub birth_date: NaiveDate,
    pub ktp_number: String,
}

pub type UserUpdate = NewUser;

impl NewUser {
    /// Reject blank text fields. Returns the first offending field name.
    pub fn blank_field(&self) -> Option<&'static str> {
        [
            ("name", &self.name),
            ("address", &self.address),
            ("ktpNumber", &self.ktp_number),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
    }
}
