//! Photo decoding, storage and thumbnail generation
//!
//! Two phases. [`PhotoProcessor::prepare`] decodes and validates a payload
//! without touching disk, so oversize or malformed photos are rejected before
//! anything is persisted. [`PhotoProcessor::store`] writes originals and
//! thumbnails for a whole batch; if any photo fails, every file written for
//! the batch is removed again.

use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::validator::{self, decode_image_payload, detect_image_mime};
use super::{DeliveryError, FieldError};
use crate::models::{Photo, PhotoInput, PhotoType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoLimits {
    pub max_bytes: usize,
    pub thumbnail_max_dim: u32,
    pub require_gps_for_proof: bool,
}

impl Default for PhotoLimits {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            thumbnail_max_dim: 320,
            require_gps_for_proof: false,
        }
    }
}

/// A decoded, validated photo not yet written to disk
#[derive(Debug, Clone)]
pub struct PreparedPhoto {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub photo_type: PhotoType,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PhotoProcessor {
    root: PathBuf,
    limits: PhotoLimits,
}

impl PhotoProcessor {
    /// `root` is the directory photos are stored under (one subdirectory per
    /// delivery)
    pub fn new(root: impl Into<PathBuf>, limits: PhotoLimits) -> Self {
        Self {
            root: root.into(),
            limits,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> PhotoLimits {
        self.limits
    }

    /// Decode and validate one uploaded photo
    pub fn prepare(&self, index: usize, input: &PhotoInput) -> Result<PreparedPhoto, DeliveryError> {
        let field = |name: &str| format!("photos[{}].{}", index, name);

        let bytes = decode_image_payload(&input.data).map_err(|message| {
            DeliveryError::InvalidPhoto(vec![FieldError::new(field("data"), message)])
        })?;

        if bytes.len() > self.limits.max_bytes {
            return Err(DeliveryError::PhotoTooLarge {
                index,
                size: bytes.len(),
                limit: self.limits.max_bytes,
            });
        }

        let mime_type = detect_image_mime(&bytes);
        let validation = validator::validate_photo(
            bytes.len(),
            mime_type,
            input.gps_latitude,
            input.gps_longitude,
            input.photo_type,
            self.limits.max_bytes,
            self.limits.require_gps_for_proof,
        );
        if !validation.valid {
            let errors = validation
                .errors
                .into_iter()
                .map(|e| FieldError::new(field(&e.field), e.message))
                .collect();
            return Err(DeliveryError::InvalidPhoto(errors));
        }

        let Some(mime_type) = mime_type else {
            return Err(DeliveryError::InvalidPhoto(vec![FieldError::new(
                field("data"),
                "Photo must be JPEG, PNG or WebP",
            )]));
        };

        Ok(PreparedPhoto {
            bytes,
            mime_type,
            photo_type: input.photo_type,
            gps_latitude: input.gps_latitude,
            gps_longitude: input.gps_longitude,
            captured_at: input.captured_at,
        })
    }

    /// Prepare a whole upload; the first failing photo rejects the batch
    pub fn prepare_all(&self, inputs: &[PhotoInput]) -> Result<Vec<PreparedPhoto>, DeliveryError> {
        inputs
            .iter()
            .enumerate()
            .map(|(index, input)| self.prepare(index, input))
            .collect()
    }

    /// Write originals and thumbnails for `delivery_id`
    ///
    /// All or nothing: on failure every file written by this call is removed
    /// and `PhotoProcessingFailed` is returned.
    pub async fn store(
        &self,
        delivery_id: Uuid,
        photos: Vec<PreparedPhoto>,
    ) -> Result<Vec<Photo>, DeliveryError> {
        if photos.is_empty() {
            return Ok(Vec::new());
        }

        let root = self.root.clone();
        let max_dim = self.limits.thumbnail_max_dim;

        tokio::task::spawn_blocking(move || store_batch(&root, delivery_id, photos, max_dim))
            .await
            .map_err(|e| DeliveryError::PhotoProcessingFailed(format!("photo task failed: {}", e)))?
    }

    /// Remove stored files (used when the surrounding transaction rolls back)
    pub async fn remove(&self, photos: &[Photo]) {
        let paths: Vec<PathBuf> = photos
            .iter()
            .flat_map(|p| [self.root.join(&p.path), self.root.join(&p.thumbnail_path)])
            .collect();
        let _ = tokio::task::spawn_blocking(move || remove_files(&paths)).await;
    }

    /// Remove every stored file of a delivery
    pub async fn remove_delivery(&self, delivery_id: Uuid) {
        let dir = self.root.join(delivery_id.to_string());
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(delivery_id = %delivery_id, "Failed to remove photo directory {}: {}", dir.display(), e);
            }
        }
    }
}

fn store_batch(
    root: &Path,
    delivery_id: Uuid,
    photos: Vec<PreparedPhoto>,
    max_dim: u32,
) -> Result<Vec<Photo>, DeliveryError> {
    let mut written: Vec<PathBuf> = Vec::new();
    let mut stored = Vec::with_capacity(photos.len());

    for (index, prepared) in photos.into_iter().enumerate() {
        match store_one(root, delivery_id, prepared, max_dim, &mut written) {
            Ok(photo) => stored.push(photo),
            Err(message) => {
                warn!(delivery_id = %delivery_id, index, "Photo processing failed: {}", message);
                remove_files(&written);
                return Err(DeliveryError::PhotoProcessingFailed(format!(
                    "photo {}: {}",
                    index, message
                )));
            }
        }
    }

    debug!(delivery_id = %delivery_id, count = stored.len(), "Stored delivery photos");
    Ok(stored)
}

fn store_one(
    root: &Path,
    delivery_id: Uuid,
    prepared: PreparedPhoto,
    max_dim: u32,
    written: &mut Vec<PathBuf>,
) -> Result<Photo, String> {
    let format = image_format(prepared.mime_type)?;
    let image = image::load_from_memory_with_format(&prepared.bytes, format)
        .map_err(|e| format!("decode failed: {}", e))?;

    let thumbnail = image.resize(max_dim, max_dim, FilterType::Triangle).to_rgb8();
    let mut thumb_bytes = Cursor::new(Vec::new());
    thumbnail
        .write_to(&mut thumb_bytes, ImageFormat::Jpeg)
        .map_err(|e| format!("thumbnail failed: {}", e))?;

    let photo_id = Uuid::new_v4();
    let rel_dir = PathBuf::from(delivery_id.to_string());
    let rel_path = rel_dir.join(format!("{}.{}", photo_id, extension(format)));
    let rel_thumb = rel_dir.join(format!("{}_thumb.jpg", photo_id));

    std::fs::create_dir_all(root.join(&rel_dir)).map_err(|e| format!("mkdir failed: {}", e))?;

    let abs_path = root.join(&rel_path);
    std::fs::write(&abs_path, &prepared.bytes).map_err(|e| format!("write failed: {}", e))?;
    written.push(abs_path);

    let abs_thumb = root.join(&rel_thumb);
    std::fs::write(&abs_thumb, thumb_bytes.into_inner())
        .map_err(|e| format!("thumbnail write failed: {}", e))?;
    written.push(abs_thumb);

    Ok(Photo {
        id: photo_id,
        delivery_id,
        path: path_string(&rel_path),
        thumbnail_path: path_string(&rel_thumb),
        photo_type: prepared.photo_type,
        gps_latitude: prepared.gps_latitude,
        gps_longitude: prepared.gps_longitude,
        file_size: prepared.bytes.len() as u64,
        width: image.width(),
        height: image.height(),
        mime_type: prepared.mime_type.to_string(),
        captured_at: prepared.captured_at,
        created_at: lgx_common::time::now(),
    })
}

fn image_format(mime_type: &str) -> Result<ImageFormat, String> {
    match mime_type {
        "image/jpeg" => Ok(ImageFormat::Jpeg),
        "image/png" => Ok(ImageFormat::Png),
        "image/webp" => Ok(ImageFormat::WebP),
        other => Err(format!("unsupported type {}", other)),
    }
}

fn extension(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        _ => "bin",
    }
}

/// Stored paths always use `/`, whatever the host
fn path_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}
