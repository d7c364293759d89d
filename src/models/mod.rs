//! Core data models for the customer registry.
//!
//! Row types map to database tables via `sqlx::FromRow` and serialize as
//! camelCase JSON. Request payloads are mapped onto rows field by field.

pub mod user;
pub mod vehicle;
