//! src/services/vehicle_service.rs
//!
//! VehicleService owns the `vehicles` table and the image attached to each
//! vehicle. Every lookup is scoped by `(vehicle_id, owner_id)`: a vehicle that
//! belongs to someone else is indistinguishable from one that does not exist.
//!
//! Image lifecycle per vehicle:
//!
//! ```text
//! NoImage --upload--> HasImage(a) --upload/update--> HasImage(b) --delete--> NoImage
//! ```
//!
//! Upload and update share one slot-replace routine. The new file is written
//! and referenced first, then the previous file (if differently named) is
//! removed, so the stored reference always names a file that exists.

use crate::{
    models::vehicle::{NewVehicle, Vehicle, VehicleUpdate},
    services::{
        RegistryError, RegistryResult,
        image_store::{ImageStore, ImageStoreError, StoredImage, image_filename},
        vehicle_locks::VehicleLocks,
    },
};
use bytes::Bytes;
use futures::Stream;
use sqlx::SqlitePool;
use std::{io, sync::Arc};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

pub const ALLOWED_IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// An incoming image: the client's filename, its declared content type and
/// the body as a byte stream. The stream is only polled once validation and
/// the ownership lookup have passed.
pub struct ImageUpload<S> {
    pub original_filename: String,
    pub content_type: Option<String>,
    pub stream: S,
}

#[derive(Clone)]
pub struct VehicleService {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,

    /// Namespace holding vehicle images.
    pub images: ImageStore,

    locks: VehicleLocks,
}

impl VehicleService {
    pub fn new(db: Arc<SqlitePool>, images: ImageStore, locks: VehicleLocks) -> Self {
        Self { db, images, locks }
    }

    async fn fetch_for_owner(&self, vehicle_id: i64, owner_id: i64) -> RegistryResult<Option<Vehicle>> {
        let vehicle = sqlx::query_as::<_, Vehicle>(
            "SELECT id, license_plate, registration_id, brand, model, user_id AS owner_id, vehicle_image
             FROM vehicles WHERE id = ? AND user_id = ?",
        )
        .bind(vehicle_id)
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(vehicle)
    }

    /// Resolve the vehicle, then take its lock and read it again.
    ///
    /// Locks are only created for vehicles that exist, and the returned row
    /// reflects any change made by a request that held the lock before us.
    async fn lock_for_owner(
        &self,
        vehicle_id: i64,
        owner_id: i64,
    ) -> RegistryResult<Option<(OwnedMutexGuard<()>, Vehicle)>> {
        if self.fetch_for_owner(vehicle_id, owner_id).await?.is_none() {
            return Ok(None);
        }
        let guard = self.locks.acquire(vehicle_id).await;
        Ok(self
            .fetch_for_owner(vehicle_id, owner_id)
            .await?
            .map(|vehicle| (guard, vehicle)))
    }

    async fn owner_exists(&self, owner_id: i64) -> RegistryResult<bool> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE id = ?")
            .bind(owner_id)
            .fetch_one(&*self.db)
            .await?;
        Ok(count > 0)
    }

    pub async fn list_for_owner(&self, owner_id: i64) -> RegistryResult<Vec<Vehicle>> {
        debug!("fetching vehicles for user {}", owner_id);
        let vehicles = sqlx::query_as::<_, Vehicle>(
            "SELECT id, license_plate, registration_id, brand, model, user_id AS owner_id, vehicle_image
             FROM vehicles WHERE user_id = ? ORDER BY id ASC",
        )
        .bind(owner_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(vehicles)
    }

    pub async fn find_for_owner(&self, vehicle_id: i64, owner_id: i64) -> RegistryResult<Vehicle> {
        self.fetch_for_owner(vehicle_id, owner_id)
            .await?
            .ok_or(RegistryError::VehicleNotFound {
                vehicle_id,
                owner_id,
            })
    }

    /// Create a batch of vehicles under `owner_id` in a single transaction.
    pub async fn create_for_owner(
        &self,
        owner_id: i64,
        vehicles: Vec<NewVehicle>,
    ) -> RegistryResult<Vec<Vehicle>> {
        if vehicles.is_empty() {
            return Err(RegistryError::Validation(
                "at least one vehicle is required".into(),
            ));
        }
        if let Some(field) = vehicles.iter().find_map(NewVehicle::blank_field) {
            return Err(RegistryError::Validation(format!("`{}` must not be blank", field)));
        }
        if !self.owner_exists(owner_id).await? {
            warn!("cannot create vehicles: user {} not found", owner_id);
            return Err(RegistryError::UserNotFound(owner_id));
        }

        info!("creating {} vehicles for user {}", vehicles.len(), owner_id);
        let mut tx = self.db.begin().await?;
        let mut created = Vec::with_capacity(vehicles.len());
        for vehicle in &vehicles {
            let row = sqlx::query_as::<_, Vehicle>(
                "INSERT INTO vehicles (license_plate, registration_id, brand, model, user_id)
                 VALUES (?, ?, ?, ?, ?)
                 RETURNING id, license_plate, registration_id, brand, model, user_id AS owner_id, vehicle_image",
            )
            .bind(vehicle.license_plate.trim())
            .bind(vehicle.registration_id.trim())
            .bind(vehicle.brand.trim())
            .bind(vehicle.model.trim())
            .bind(owner_id)
            .fetch_one(&mut *tx)
            .await?;
            created.push(row);
        }
        tx.commit().await?;

        Ok(created)
    }

    /// Replace the descriptive fields of a vehicle. The image reference and
    /// owner are left untouched.
    pub async fn update_vehicle(
        &self,
        vehicle_id: i64,
        owner_id: i64,
        details: VehicleUpdate,
    ) -> RegistryResult<Vehicle> {
        if let Some(field) = details.blank_field() {
            return Err(RegistryError::Validation(format!("`{}` must not be blank", field)));
        }

        let updated = sqlx::query_as::<_, Vehicle>(
            "UPDATE vehicles
             SET license_plate = ?, registration_id = ?, brand = ?, model = ?
             WHERE id = ? AND user_id = ?
             RETURNING id, license_plate, registration_id, brand, model, user_id AS owner_id, vehicle_image",
        )
        .bind(details.license_plate.trim())
        .bind(details.registration_id.trim())
        .bind(details.brand.trim())
        .bind(details.model.trim())
        .bind(vehicle_id)
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await?;

        match updated {
            Some(vehicle) => {
                info!("updated vehicle {} for user {}", vehicle_id, owner_id);
                Ok(vehicle)
            }
            None => {
                warn!("vehicle {} not found for user {}", vehicle_id, owner_id);
                Err(RegistryError::VehicleNotFound {
                    vehicle_id,
                    owner_id,
                })
            }
        }
    }

    /// Delete a vehicle and, best-effort, its image file.
    ///
    /// Returns false when the vehicle does not resolve under `owner_id`.
    pub async fn delete_vehicle(&self, vehicle_id: i64, owner_id: i64) -> RegistryResult<bool> {
        let Some((guard, vehicle)) = self.lock_for_owner(vehicle_id, owner_id).await? else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM vehicles WHERE id = ? AND user_id = ?")
            .bind(vehicle_id)
            .bind(owner_id)
            .execute(&*self.db)
            .await?;
        warn!("deleted vehicle {} for user {}", vehicle_id, owner_id);

        if let Some(filename) = vehicle.vehicle_image.as_deref() {
            self.discard_image(vehicle_id, filename).await;
        }

        drop(guard);
        self.locks.forget(vehicle_id);
        Ok(true)
    }

    /// Attach an image to a vehicle, replacing whatever was attached before.
    pub async fn upload_image<S>(
        &self,
        vehicle_id: i64,
        owner_id: i64,
        upload: ImageUpload<S>,
    ) -> RegistryResult<Vehicle>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        info!("uploading image for vehicle {} by user {}", vehicle_id, owner_id);
        self.replace_image(vehicle_id, owner_id, upload).await
    }

    /// Re-upload a vehicle's image. The previous file is removed once the new
    /// one is referenced.
    pub async fn update_image<S>(
        &self,
        vehicle_id: i64,
        owner_id: i64,
        upload: ImageUpload<S>,
    ) -> RegistryResult<Vehicle>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        info!("updating image for vehicle {} by user {}", vehicle_id, owner_id);
        self.replace_image(vehicle_id, owner_id, upload).await
    }

    async fn replace_image<S>(
        &self,
        vehicle_id: i64,
        owner_id: i64,
        upload: ImageUpload<S>,
    ) -> RegistryResult<Vehicle>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        if let Err(err) = ensure_supported_media_type(upload.content_type.as_deref()) {
            warn!("invalid file type uploaded for vehicle {}", vehicle_id);
            return Err(err);
        }

        let Some((_guard, vehicle)) = self.lock_for_owner(vehicle_id, owner_id).await? else {
            warn!("vehicle {} not found for user {}", vehicle_id, owner_id);
            return Err(RegistryError::VehicleNotFound {
                vehicle_id,
                owner_id,
            });
        };

        let filename = image_filename(vehicle.id, &upload.original_filename);
        let size_bytes = self.images.put_stream(&filename, upload.stream).await?;

        let previous = vehicle.vehicle_image;
        let updated = match self.set_image_reference(vehicle.id, owner_id, Some(&filename)).await {
            Ok(updated) => updated,
            Err(err) => {
                // Only remove the new file if it did not overwrite the one
                // still referenced by the row.
                if previous.as_deref() != Some(filename.as_str()) {
                    self.discard_image(vehicle.id, &filename).await;
                }
                return Err(err);
            }
        };

        if let Some(old) = previous.filter(|old| *old != filename) {
            self.discard_image(vehicle.id, &old).await;
        }

        info!(
            "stored image {} ({} bytes) for vehicle {}",
            filename, size_bytes, vehicle.id
        );
        Ok(updated)
    }

    /// Open the image attached to a vehicle.
    pub async fn get_image(&self, vehicle_id: i64, owner_id: i64) -> RegistryResult<StoredImage> {
        debug!("fetching image for vehicle {} by user {}", vehicle_id, owner_id);
        let vehicle = self.find_for_owner(vehicle_id, owner_id).await?;
        let Some(filename) = vehicle.vehicle_image else {
            warn!("image not found for vehicle {}", vehicle_id);
            return Err(RegistryError::ImageNotFound(vehicle_id));
        };

        match self.images.get(&filename).await {
            Ok(image) => {
                info!(
                    "serving image for vehicle {} with content type {}",
                    vehicle_id, image.content_type
                );
                Ok(image)
            }
            Err(ImageStoreError::NotFound(_)) => {
                warn!("file {} missing for vehicle {}", filename, vehicle_id);
                Err(RegistryError::ImageNotFound(vehicle_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Detach and delete a vehicle's image.
    ///
    /// Returns false when the vehicle does not resolve or has no image.
    /// Filesystem failures are returned as errors, not folded into false.
    pub async fn delete_image(&self, vehicle_id: i64, owner_id: i64) -> RegistryResult<bool> {
        let Some((_guard, vehicle)) = self.lock_for_owner(vehicle_id, owner_id).await? else {
            warn!("vehicle {} not found for user {}", vehicle_id, owner_id);
            return Ok(false);
        };
        let Some(filename) = vehicle.vehicle_image else {
            warn!("image not found for vehicle {}", vehicle_id);
            return Ok(false);
        };

        if !self.images.delete(&filename).await? {
            warn!("image file {} was already missing for vehicle {}", filename, vehicle_id);
        }
        self.set_image_reference(vehicle_id, owner_id, None).await?;

        info!("image deleted for vehicle {}", vehicle_id);
        Ok(true)
    }

    /// Point the vehicle at `filename`. A row that no longer resolves under
    /// `owner_id` is reported as `VehicleNotFound`.
    async fn set_image_reference(
        &self,
        vehicle_id: i64,
        owner_id: i64,
        filename: Option<&str>,
    ) -> RegistryResult<Vehicle> {
        sqlx::query_as::<_, Vehicle>(
            "UPDATE vehicles SET vehicle_image = ? WHERE id = ? AND user_id = ?
             RETURNING id, license_plate, registration_id, brand, model, user_id AS owner_id, vehicle_image",
        )
        .bind(filename)
        .bind(vehicle_id)
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(RegistryError::VehicleNotFound {
            vehicle_id,
            owner_id,
        })
    }

    /// Best-effort removal of a file that is no longer referenced.
    async fn discard_image(&self, vehicle_id: i64, filename: &str) {
        match self.images.delete(filename).await {
            Ok(true) => debug!("removed image {} of vehicle {}", filename, vehicle_id),
            Ok(false) => debug!("image {} of vehicle {} already gone", filename, vehicle_id),
            Err(err) => warn!(
                "could not remove image {} of vehicle {}: {}",
                filename, vehicle_id, err
            ),
        }
    }
}

/// Accept only JPEG, PNG and WEBP. Parameters such as `; charset=...` are
/// ignored and the comparison is case-insensitive.
pub fn ensure_supported_media_type(content_type: Option<&str>) -> RegistryResult<()> {
    let essence = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if ALLOWED_IMAGE_TYPES.contains(&essence.as_str()) {
        Ok(())
    } else {
        Err(RegistryError::UnsupportedMediaType(
            content_type.unwrap_or("none").to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{insert_user, insert_vehicle, memory_pool};
    use tokio::io::AsyncReadExt;

    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    struct Fixture {
        service: VehicleService,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn path(&self, filename: &str) -> std::path::PathBuf {
            self.service.images.base_path().join(filename)
        }

        async fn reference(&self, vehicle_id: i64) -> Option<String> {
            sqlx::query_scalar::<_, Option<String>>("SELECT vehicle_image FROM vehicles WHERE id = ?")
                .bind(vehicle_id)
                .fetch_one(&*self.service.db)
                .await
                .unwrap()
        }
    }

    /// User 25 owns vehicle 5 (no image). User 26 owns vehicle 6.
    async fn fixture() -> Fixture {
        let pool = memory_pool().await;
        insert_user(&pool, 25, "5678910").await;
        insert_user(&pool, 26, "1112131").await;
        insert_vehicle(&pool, 5, 25, "B 888 ARS", None).await;
        insert_vehicle(&pool, 6, 26, "L 1234 XY", None).await;

        let dir = tempfile::tempdir().unwrap();
        let images = ImageStore::new(dir.path().join("uploads"), 1024 * 1024);
        Fixture {
            service: VehicleService::new(Arc::new(pool), images, VehicleLocks::new()),
            _dir: dir,
        }
    }

    fn upload(
        name: &str,
        content_type: &str,
        data: &'static [u8],
    ) -> ImageUpload<impl Stream<Item = io::Result<Bytes>>> {
        ImageUpload {
            original_filename: name.to_string(),
            content_type: Some(content_type.to_string()),
            stream: futures::stream::iter(vec![Ok(Bytes::from_static(data))]),
        }
    }

    #[tokio::test]
    async fn upload_accepts_each_allowed_image_type() {
        let fx = fixture().await;
        for (content_type, name) in [
            ("image/jpeg", "car.jpg"),
            ("image/png", "car.png"),
            ("image/webp", "car.webp"),
        ] {
            let vehicle = fx
                .service
                .upload_image(5, 25, upload(name, content_type, PNG_BYTES))
                .await
                .unwrap();
            let expected = format!("5_{}", name);
            assert_eq!(vehicle.vehicle_image.as_deref(), Some(expected.as_str()));
            assert!(fx.path(&expected).is_file());
        }
    }

    #[tokio::test]
    async fn upload_accepts_content_type_parameters() {
        let fx = fixture().await;
        let vehicle = fx
            .service
            .upload_image(5, 25, upload("car.png", "IMAGE/PNG; charset=binary", PNG_BYTES))
            .await
            .unwrap();
        assert_eq!(vehicle.vehicle_image.as_deref(), Some("5_car.png"));
    }

    #[tokio::test]
    async fn upload_rejects_other_content_types_without_side_effects() {
        let fx = fixture().await;
        let err = fx
            .service
            .upload_image(5, 25, upload("notes.txt", "text/plain", b"hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnsupportedMediaType(ref ct) if ct == "text/plain"));

        let missing = ImageUpload {
            original_filename: "car.png".to_string(),
            content_type: None,
            stream: futures::stream::iter(vec![Ok(Bytes::from_static(PNG_BYTES))]),
        };
        let err = fx.service.upload_image(5, 25, missing).await.unwrap_err();
        assert!(matches!(err, RegistryError::UnsupportedMediaType(_)));

        assert_eq!(fx.reference(5).await, None);
        assert!(!fx.service.images.base_path().exists());
    }

    #[tokio::test]
    async fn upload_to_foreign_or_missing_vehicle_is_not_found() {
        let fx = fixture().await;

        let err = fx
            .service
            .upload_image(6, 25, upload("car.png", "image/png", PNG_BYTES))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::VehicleNotFound { vehicle_id: 6, owner_id: 25 }
        ));

        let err = fx
            .service
            .upload_image(999, 25, upload("car.png", "image/png", PNG_BYTES))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::VehicleNotFound { vehicle_id: 999, .. }));

        assert!(!fx.service.images.base_path().exists());
        assert_eq!(fx.reference(6).await, None);
    }

    #[tokio::test]
    async fn upload_sanitizes_traversal_in_original_filename() {
        let fx = fixture().await;
        let vehicle = fx
            .service
            .upload_image(5, 25, upload("../../etc/evil.png", "image/png", PNG_BYTES))
            .await
            .unwrap();
        assert_eq!(vehicle.vehicle_image.as_deref(), Some("5_evil.png"));
        assert!(fx.path("5_evil.png").is_file());
    }

    #[tokio::test]
    async fn reupload_with_new_name_removes_previous_file() {
        let fx = fixture().await;
        fx.service
            .upload_image(5, 25, upload("first.png", "image/png", PNG_BYTES))
            .await
            .unwrap();
        fx.service
            .upload_image(5, 25, upload("second.png", "image/png", PNG_BYTES))
            .await
            .unwrap();

        assert_eq!(fx.reference(5).await.as_deref(), Some("5_second.png"));
        assert!(fx.path("5_second.png").is_file());
        assert!(!fx.path("5_first.png").exists());
    }

    #[tokio::test]
    async fn update_image_replaces_old_file() {
        let fx = fixture().await;
        fx.service
            .images
            .put("5_old.png", Bytes::from_static(PNG_BYTES))
            .await
            .unwrap();
        sqlx::query("UPDATE vehicles SET vehicle_image = '5_old.png' WHERE id = 5")
            .execute(&*fx.service.db)
            .await
            .unwrap();

        let vehicle = fx
            .service
            .update_image(5, 25, upload("new.png", "image/png", PNG_BYTES))
            .await
            .unwrap();

        assert_eq!(vehicle.vehicle_image.as_deref(), Some("5_new.png"));
        assert_eq!(fx.reference(5).await.as_deref(), Some("5_new.png"));
        assert!(fx.path("5_new.png").is_file());
        assert!(!fx.path("5_old.png").exists());
    }

    #[tokio::test]
    async fn update_image_with_same_name_keeps_the_new_content() {
        let fx = fixture().await;
        fx.service
            .upload_image(5, 25, upload("car.png", "image/png", b"old bytes"))
            .await
            .unwrap();
        fx.service
            .update_image(5, 25, upload("car.png", "image/png", b"new bytes"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(fx.path("5_car.png")).unwrap(), b"new bytes");
        assert_eq!(fx.reference(5).await.as_deref(), Some("5_car.png"));
    }

    #[tokio::test]
    async fn update_image_tolerates_missing_previous_file() {
        let fx = fixture().await;
        sqlx::query("UPDATE vehicles SET vehicle_image = '5_gone.png' WHERE id = 5")
            .execute(&*fx.service.db)
            .await
            .unwrap();

        let vehicle = fx
            .service
            .update_image(5, 25, upload("new.png", "image/png", PNG_BYTES))
            .await
            .unwrap();
        assert_eq!(vehicle.vehicle_image.as_deref(), Some("5_new.png"));
    }

    #[tokio::test]
    async fn update_image_rejects_bad_type_and_missing_vehicle() {
        let fx = fixture().await;
        assert!(matches!(
            fx.service
                .update_image(5, 25, upload("a.gif", "image/gif", PNG_BYTES))
                .await,
            Err(RegistryError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            fx.service
                .update_image(999, 25, upload("a.png", "image/png", PNG_BYTES))
                .await,
            Err(RegistryError::VehicleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn oversized_upload_leaves_reference_untouched() {
        let pool = memory_pool().await;
        insert_user(&pool, 25, "5678910").await;
        insert_vehicle(&pool, 5, 25, "B 888 ARS", None).await;
        let dir = tempfile::tempdir().unwrap();
        let service = VehicleService::new(
            Arc::new(pool),
            ImageStore::new(dir.path(), 4),
            VehicleLocks::new(),
        );

        let err = service
            .upload_image(5, 25, upload("car.png", "image/png", PNG_BYTES))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::PayloadTooLarge { limit: 4 }));
        assert_eq!(service.find_for_owner(5, 25).await.unwrap().vehicle_image, None);
    }

    #[tokio::test]
    async fn delete_image_without_image_returns_false() {
        let fx = fixture().await;
        assert!(!fx.service.delete_image(5, 25).await.unwrap());
        assert!(!fx.service.delete_image(999, 25).await.unwrap());
        assert!(!fx.service.delete_image(6, 25).await.unwrap());
    }

    #[tokio::test]
    async fn delete_image_removes_file_and_reference() {
        let fx = fixture().await;
        fx.service
            .upload_image(5, 25, upload("car.png", "image/png", PNG_BYTES))
            .await
            .unwrap();

        assert!(fx.service.delete_image(5, 25).await.unwrap());
        assert_eq!(fx.reference(5).await, None);
        assert!(!fx.path("5_car.png").exists());

        assert!(!fx.service.delete_image(5, 25).await.unwrap());
    }

    #[tokio::test]
    async fn delete_image_clears_reference_when_file_already_missing() {
        let fx = fixture().await;
        sqlx::query("UPDATE vehicles SET vehicle_image = '5_gone.png' WHERE id = 5")
            .execute(&*fx.service.db)
            .await
            .unwrap();

        assert!(fx.service.delete_image(5, 25).await.unwrap());
        assert_eq!(fx.reference(5).await, None);
    }

    #[tokio::test]
    async fn delete_image_surfaces_io_failure_and_keeps_reference() {
        let fx = fixture().await;
        std::fs::create_dir_all(fx.path("5_dir.png")).unwrap();
        sqlx::query("UPDATE vehicles SET vehicle_image = '5_dir.png' WHERE id = 5")
            .execute(&*fx.service.db)
            .await
            .unwrap();

        let err = fx.service.delete_image(5, 25).await.unwrap_err();

        assert!(matches!(err, RegistryError::Io(_)));
        assert_eq!(fx.reference(5).await.as_deref(), Some("5_dir.png"));
        assert!(fx.path("5_dir.png").is_dir());
    }

    #[tokio::test]
    async fn image_reference_on_vanished_row_is_not_found() {
        let fx = fixture().await;
        assert!(matches!(
            fx.service.set_image_reference(99, 25, Some("99_car.png")).await,
            Err(RegistryError::VehicleNotFound {
                vehicle_id: 99,
                owner_id: 25
            })
        ));
        assert!(matches!(
            fx.service.set_image_reference(6, 25, None).await,
            Err(RegistryError::VehicleNotFound { .. })
        ));
        assert_eq!(fx.reference(6).await, None);
    }

    #[tokio::test]
    async fn get_image_streams_bytes_with_detected_type() {
        let fx = fixture().await;
        fx.service
            .upload_image(5, 25, upload("car.png", "image/png", PNG_BYTES))
            .await
            .unwrap();

        let mut image = fx.service.get_image(5, 25).await.unwrap();
        assert_eq!(image.filename, "5_car.png");
        assert_eq!(image.content_type, "image/png");

        let mut buf = Vec::new();
        image.file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, PNG_BYTES);
    }

    #[tokio::test]
    async fn get_image_not_found_cases() {
        let fx = fixture().await;
        assert!(matches!(
            fx.service.get_image(999, 25).await,
            Err(RegistryError::VehicleNotFound { vehicle_id: 999, owner_id: 25 })
        ));
        assert!(matches!(
            fx.service.get_image(5, 25).await,
            Err(RegistryError::ImageNotFound(5))
        ));

        sqlx::query("UPDATE vehicles SET vehicle_image = '5_gone.png' WHERE id = 5")
            .execute(&*fx.service.db)
            .await
            .unwrap();
        assert!(matches!(
            fx.service.get_image(5, 25).await,
            Err(RegistryError::ImageNotFound(5))
        ));
    }

    #[tokio::test]
    async fn create_for_owner_assigns_owner() {
        let fx = fixture().await;
        let created = fx
            .service
            .create_for_owner(
                25,
                vec![
                    NewVehicle {
                        license_plate: "B 1 AA".into(),
                        registration_id: "REG-010".into(),
                        brand: "Toyota".into(),
                        model: "Avanza".into(),
                    },
                    NewVehicle {
                        license_plate: "B 2 AA".into(),
                        registration_id: "REG-011".into(),
                        brand: "Honda".into(),
                        model: "Jazz".into(),
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|v| v.owner_id == 25 && v.vehicle_image.is_none()));
        assert_eq!(fx.service.list_for_owner(25).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn create_for_owner_is_all_or_nothing() {
        let fx = fixture().await;
        let batch = vec![
            NewVehicle {
                license_plate: "B 3 AA".into(),
                registration_id: "REG-012".into(),
                brand: "Suzuki".into(),
                model: "Ertiga".into(),
            },
            NewVehicle {
                license_plate: "B 888 ARS".into(),
                registration_id: "REG-013".into(),
                brand: "VeWe".into(),
                model: "Srilocco".into(),
            },
        ];

        let err = fx.service.create_for_owner(25, batch).await.unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
        assert_eq!(fx.service.list_for_owner(25).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_for_owner_rejects_missing_user_and_blank_fields() {
        let fx = fixture().await;
        let vehicle = NewVehicle {
            license_plate: "B 4 AA".into(),
            registration_id: "REG-014".into(),
            brand: "Daihatsu".into(),
            model: "Xenia".into(),
        };

        assert!(matches!(
            fx.service.create_for_owner(404, vec![vehicle.clone()]).await,
            Err(RegistryError::UserNotFound(404))
        ));
        assert!(matches!(
            fx.service.create_for_owner(25, vec![]).await,
            Err(RegistryError::Validation(_))
        ));
        let blank = NewVehicle {
            brand: "  ".into(),
            ..vehicle
        };
        assert!(matches!(
            fx.service.create_for_owner(25, vec![blank]).await,
            Err(RegistryError::Validation(msg)) if msg.contains("brand")
        ));
    }

    #[tokio::test]
    async fn update_vehicle_keeps_image_reference() {
        let fx = fixture().await;
        fx.service
            .upload_image(5, 25, upload("car.png", "image/png", PNG_BYTES))
            .await
            .unwrap();

        let updated = fx
            .service
            .update_vehicle(
                5,
                25,
                VehicleUpdate {
                    license_plate: "B 888 ARS".into(),
                    registration_id: "REG-004".into(),
                    brand: "VeWe".into(),
                    model: "Srilocco GT".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.model, "Srilocco GT");
        assert_eq!(updated.vehicle_image.as_deref(), Some("5_car.png"));

        assert!(matches!(
            fx.service
                .update_vehicle(
                    6,
                    25,
                    VehicleUpdate {
                        license_plate: "X".into(),
                        registration_id: "Y".into(),
                        brand: "Z".into(),
                        model: "W".into(),
                    },
                )
                .await,
            Err(RegistryError::VehicleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_vehicle_removes_its_image() {
        let fx = fixture().await;
        fx.service
            .upload_image(5, 25, upload("car.png", "image/png", PNG_BYTES))
            .await
            .unwrap();

        assert!(fx.service.delete_vehicle(5, 25).await.unwrap());
        assert!(!fx.path("5_car.png").exists());
        assert!(matches!(
            fx.service.find_for_owner(5, 25).await,
            Err(RegistryError::VehicleNotFound { .. })
        ));
        assert!(!fx.service.delete_vehicle(5, 25).await.unwrap());
        assert!(!fx.service.delete_vehicle(6, 25).await.unwrap());
    }

    #[test]
    fn media_type_check() {
        assert!(ensure_supported_media_type(Some("image/webp")).is_ok());
        assert!(ensure_supported_media_type(Some(" image/jpeg ")).is_ok());
        assert!(ensure_supported_media_type(Some("image/svg+xml")).is_err());
        assert!(ensure_supported_media_type(None).is_err());
    }
}
