//! HTTP handlers, grouped by resource.

pub mod health_handlers;
pub mod user_handlers;
pub mod vehicle_handlers;
