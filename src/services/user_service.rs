//! src/services/user_service.rs
//!
//! UserService owns the `users` table. Deleting a user cascades to its
//! vehicles at the database level; their image files are removed here.

use crate::{
    models::user::{NewUser, User, UserUpdate},
    services::{
        RegistryError, RegistryResult, image_store::ImageStore, vehicle_locks::VehicleLocks,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct UserService {
    pub db: Arc<SqlitePool>,
    images: ImageStore,
    locks: VehicleLocks,
}

impl UserService {
    pub fn new(db: Arc<SqlitePool>, images: ImageStore, locks: VehicleLocks) -> Self {
        Self { db, images, locks }
    }

    pub async fn list_users(&self) -> RegistryResult<Vec<User>> {
        debug!("fetching all users");
        let users = sqlx::query_as::<_, User>(
            "SELECT id, name, address, birth_date, ktp_number FROM users ORDER BY id ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(users)
    }

    pub async fn find_user(&self, id: i64) -> RegistryResult<User> {
        debug!("fetching user {}", id);
        sqlx::query_as::<_, User>(
            "SELECT id, name, address, birth_date, ktp_number FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(RegistryError::UserNotFound(id))
    }

    /// Insert a batch of users atomically.
    pub async fn create_users(&self, users: Vec<NewUser>) -> RegistryResult<Vec<User>> {
        if users.is_empty() {
            return Err(RegistryError::Validation("at least one user is required".into()));
        }
        if let Some(field) = users.iter().find_map(NewUser::blank_field) {
            return Err(RegistryError::Validation(format!("`{}` must not be blank", field)));
        }

        info!("creating {} users", users.len());
        let mut tx = self.db.begin().await?;
        let mut created = Vec::with_capacity(users.len());
        for user in &users {
            let row = sqlx::query_as::<_, User>(
                "INSERT INTO users (name, address, birth_date, ktp_number)
                 VALUES (?, ?, ?, ?)
                 RETURNING id, name, address, birth_date, ktp_number",
            )
            .bind(user.name.trim())
            .bind(user.address.trim())
            .bind(user.birth_date)
            .bind(user.ktp_number.trim())
            .fetch_one(&mut *tx)
            .await?;
            created.push(row);
        }
        tx.commit().await?;

        Ok(created)
    }

    pub async fn update_user(&self, id: i64, details: UserUpdate) -> RegistryResult<User> {
        if let Some(field) = details.blank_field() {
            return Err(RegistryError::Validation(format!("`{}` must not be blank", field)));
        }

        let updated = sqlx::query_as::<_, User>(
            "UPDATE users SET name = ?, address = ?, birth_date = ?, ktp_number = ?
             WHERE id = ?
             RETURNING id, name, address, birth_date, ktp_number",
        )
        .bind(details.name.trim())
        .bind(details.address.trim())
        .bind(details.birth_date)
        .bind(details.ktp_number.trim())
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        match updated {
            Some(user) => {
                info!("updated user {}", id);
                Ok(user)
            }
            None => {
                warn!("user {} not found", id);
                Err(RegistryError::UserNotFound(id))
            }
        }
    }

    /// Delete a user together with all owned vehicles and their images.
    ///
    /// Returns false when no such user exists. The lock of every owned
    /// vehicle is held until the files are gone, so an image write in flight
    /// either lands before the rows are read or finds the vehicle missing.
    /// Image removal is best-effort and happens after the rows are gone.
    pub async fn delete_user(&self, id: i64) -> RegistryResult<bool> {
        let vehicle_ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM vehicles WHERE user_id = ? ORDER BY id ASC")
                .bind(id)
                .fetch_all(&*self.db)
                .await?;
        let mut guards = Vec::with_capacity(vehicle_ids.len());
        for vehicle_id in &vehicle_ids {
            guards.push(self.locks.acquire(*vehicle_id).await);
        }

        let mut tx = self.db.begin().await?;
        let owned: Vec<(i64, Option<String>)> =
            sqlx::query_as("SELECT id, vehicle_image FROM vehicles WHERE user_id = ?")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        tx.commit().await?;
        warn!("deleted user {} and {} owned vehicles", id, owned.len());

        for (vehicle_id, image) in &owned {
            if let Some(filename) = image {
                match self.images.delete(filename).await {
                    Ok(_) => debug!("removed image {} of vehicle {}", filename, vehicle_id),
                    Err(err) => warn!(
                        "could not remove image {} of vehicle {}: {}",
                        filename, vehicle_id, err
                    ),
                }
            }
        }

        drop(guards);
        for vehicle_id in vehicle_ids.into_iter().chain(owned.iter().map(|(id, _)| *id)) {
            self.locks.forget(vehicle_id);
        }
        Ok(true)
    }
}
