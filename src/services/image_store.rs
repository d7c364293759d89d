//! src/services/image_store.rs
//!
//! ImageStore keeps vehicle images as flat files under a single namespace
//! directory. It knows nothing about vehicles or owners; callers hand it a
//! filename and a byte stream. The directory is created lazily on first write.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

const MAX_FILENAME_LEN: usize = 255;
const MAX_ORIGINAL_NAME_LEN: usize = 200;
const MAX_PRESERVED_EXTENSION_LEN: usize = 16;
const SNIFF_LEN: usize = 64;
const FALLBACK_ORIGINAL_NAME: &str = "image";

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("image `{0}` not found")]
    NotFound(String),
    #[error("invalid image filename `{0}`")]
    InvalidFilename(String),
    #[error("image exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ImageStoreResult<T> = Result<T, ImageStoreError>;

/// An opened image ready to be streamed back to a client.
#[derive(Debug)]
pub struct StoredImage {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Positioned at the start of the file.
    pub file: File,
}

/// Flat, filename-keyed image storage on the local filesystem.
#[derive(Clone, Debug)]
pub struct ImageStore {
    base_path: PathBuf,
    max_bytes: u64,
}

impl ImageStore {
    /// Create a store rooted at `base_path` accepting files up to `max_bytes`.
    ///
    /// Nothing touches the filesystem until the first write.
    pub fn new(base_path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            base_path: base_path.into(),
            max_bytes,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Reject anything that is not a single, visible path component.
    ///
    /// Every public operation funnels through here, so a resolved path can
    /// never leave `base_path`.
    fn ensure_filename_safe(filename: &str) -> ImageStoreResult<()> {
        let invalid = || ImageStoreError::InvalidFilename(filename.to_string());
        if filename.is_empty() || filename.len() > MAX_FILENAME_LEN {
            return Err(invalid());
        }
        if filename == "." || filename == ".." || filename.starts_with('.') {
            return Err(invalid());
        }
        if filename
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(invalid());
        }
        Ok(())
    }

    fn path_for(&self, filename: &str) -> ImageStoreResult<PathBuf> {
        Self::ensure_filename_safe(filename)?;
        Ok(self.base_path.join(filename))
    }

    /// Stream bytes into `filename`, replacing any file already there.
    ///
    /// Data lands in a temp file first and is renamed into place once fully
    /// written and synced, so readers never observe a partial image.
    /// Returns the number of bytes written.
    pub async fn put_stream<S>(&self, filename: &str, stream: S) -> ImageStoreResult<u64>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let file_path = self.path_for(filename)?;
        fs::create_dir_all(&self.base_path).await?;

        let tmp_path = self.base_path.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(ImageStoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as u64;
            if size_bytes > self.max_bytes {
                drop(file);
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ImageStoreError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ImageStoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ImageStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ImageStoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ImageStoreError::Io(err));
            }
        }

        debug!("stored {} bytes at {}", size_bytes, file_path.display());
        Ok(size_bytes)
    }

    /// Convenience wrapper over [`put_stream`](Self::put_stream) for in-memory data.
    #[cfg(test)]
    pub async fn put(&self, filename: &str, data: Bytes) -> ImageStoreResult<u64> {
        self.put_stream(filename, futures::stream::iter([Ok(data)]))
            .await
    }

    /// Open `filename` for reading and detect its content type.
    ///
    /// A path that is missing, unreadable, or not a regular file is reported
    /// as `NotFound`.
    pub async fn get(&self, filename: &str) -> ImageStoreResult<StoredImage> {
        let file_path = self.path_for(filename)?;
        let not_found = || ImageStoreError::NotFound(filename.to_string());
        let mut file = File::open(&file_path).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => not_found(),
            _ => ImageStoreError::Io(err),
        })?;

        let metadata = file.metadata().await.map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        let mut head = [0u8; SNIFF_LEN];
        let mut filled = 0;
        while filled < head.len() {
            let n = file.read(&mut head[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        file.seek(SeekFrom::Start(0)).await?;

        Ok(StoredImage {
            filename: filename.to_string(),
            content_type: detect_content_type(&head[..filled], filename),
            size_bytes: metadata.len(),
            file,
        })
    }

    /// Remove `filename`. Returns whether a file was actually removed.
    pub async fn delete(&self, filename: &str) -> ImageStoreResult<bool> {
        let file_path = self.path_for(filename)?;
        match fs::remove_file(&file_path).await {
            Ok(()) => {
                debug!("removed image file {}", file_path.display());
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("image file {} already missing", file_path.display());
                Ok(false)
            }
            Err(err) => Err(ImageStoreError::Io(err)),
        }
    }

    /// Whether `filename` currently exists in the namespace.
    #[cfg(test)]
    pub async fn exists(&self, filename: &str) -> ImageStoreResult<bool> {
        let file_path = self.path_for(filename)?;
        Ok(fs::try_exists(&file_path).await?)
    }

    /// Best-effort write/read/delete round trip used by the readiness probe.
    pub async fn probe(&self) -> io::Result<()> {
        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(io::Error::other("file content mismatch"));
        }
        Ok(())
    }
}

/// Build the stored filename for a vehicle's image: `{vehicle_id}_{original}`.
pub fn image_filename(vehicle_id: i64, original_filename: &str) -> String {
    format!(
        "{}_{}",
        vehicle_id,
        sanitize_original_filename(original_filename)
    )
}

/// Reduce a client-supplied filename to a single safe path component.
///
/// Directory parts (either separator style) and control characters are
/// dropped. Names that end up empty, `.` or `..` become `image`. Overlong
/// names are shortened, keeping a short extension intact.
pub fn sanitize_original_filename(original: &str) -> String {
    let last = original.rsplit(['/', '\\']).next().unwrap_or(original);
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = match cleaned.trim() {
        "" | "." | ".." => FALLBACK_ORIGINAL_NAME,
        other => other,
    };

    if cleaned.len() <= MAX_ORIGINAL_NAME_LEN {
        return cleaned.to_string();
    }
    match cleaned.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() <= MAX_PRESERVED_EXTENSION_LEN => {
            let stem = truncate_at_char_boundary(stem, MAX_ORIGINAL_NAME_LEN - ext.len() - 1);
            format!("{}.{}", stem, ext)
        }
        _ => truncate_at_char_boundary(cleaned, MAX_ORIGINAL_NAME_LEN).to_string(),
    }
}

fn truncate_at_char_boundary(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Sniff magic bytes first, then fall back to the extension, then to a
/// generic binary type.
fn detect_content_type(head: &[u8], filename: &str) -> String {
    infer::get(head)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| {
            mime_guess::from_path(filename)
                .first_or_octet_stream()
                .to_string()
        })
}
