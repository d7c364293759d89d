//! Shared application state handed to every handler.

use crate::services::{
    image_store::ImageStore, user_service::UserService, vehicle_locks::VehicleLocks,
    vehicle_service::VehicleService,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub images: ImageStore,
    pub users: UserService,
    pub vehicles: VehicleService,
}

impl AppState {
    /// Wire the services around one pool and one image namespace. Both
    /// services share the per-vehicle locks.
    pub fn new(db: Arc<SqlitePool>, images: ImageStore) -> Self {
        let locks = VehicleLocks::new();
        Self {
            users: UserService::new(db.clone(), images.clone(), locks.clone()),
            vehicles: VehicleService::new(db.clone(), images.clone(), locks),
            db,
            images,
        }
    }
}
