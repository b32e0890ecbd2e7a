//! The crop upload flow.
//!
//! One [`UploadFlow`] covers one upload attempt:
//! `Idle -> ImageSelected -> LocationCaptured -> Uploading -> Done | Failed`.
//! The image and the location can be obtained in any order; both must be held
//! before the record is written.

use bytes::Bytes;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::backend::{Backend, BackendError};
use crate::db::{CropImage, NewCropImage};
use crate::device::{locate, Geolocator, LocationError, Position, PositionOptions};

/// Shown whenever an upload attempt fails, whatever the cause.
pub const UPLOAD_FAILED_MESSAGE: &str = "Failed to upload image. Please try again.";

/// An image file picked by the user or captured from a camera.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl ImageFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, guessing its type from the extension.
    pub async fn from_path(path: &std::path::Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self::new(file_name, content_type, bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_image(&self) -> bool {
        self.content_type.to_ascii_lowercase().starts_with("image/")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Idle,
    ImageSelected,
    LocationCaptured,
    Uploading,
    Done,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Please select a valid image file")]
    NotAnImage,
    #[error("The selected image is empty")]
    EmptyImage,
    #[error("Image is too large (max {max} bytes)")]
    TooLarge { max: usize },
    #[error("Please select an image and capture location")]
    MissingPrerequisites,
    #[error(transparent)]
    Location(#[from] LocationError),
    /// The session lapsed between capture and submit. Shown to the farmer
    /// like any other failed attempt.
    #[error("{}", UPLOAD_FAILED_MESSAGE)]
    SessionExpired,
    #[error("{}", UPLOAD_FAILED_MESSAGE)]
    Backend(#[source] BackendError),
}

impl UploadError {
    /// Whether the error came from user input rather than from the backend.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            UploadError::NotAnImage
                | UploadError::EmptyImage
                | UploadError::TooLarge { .. }
                | UploadError::MissingPrerequisites
        )
    }
}

/// Object name for a stored image: a random UUID keeping the original
/// extension (lowercased), or one derived from the MIME type.
pub fn object_name(file_name: &str, content_type: &str) -> String {
    let from_name = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase());

    let extension = from_name
        .or_else(|| {
            mime_guess::get_mime_extensions_str(content_type)
                .and_then(|exts| exts.first())
                .map(|e| e.to_string())
        })
        .unwrap_or_else(|| "bin".to_string());

    format!("{}.{}", uuid::Uuid::new_v4(), extension)
}

/// Per-attempt upload state.
#[derive(Debug)]
pub struct UploadFlow {
    bucket: String,
    max_image_bytes: usize,
    image: Option<ImageFile>,
    location: Option<Position>,
    outcome: Option<UploadState>,
}

impl UploadFlow {
    pub fn new(bucket: impl Into<String>, max_image_bytes: usize) -> Self {
        Self {
            bucket: bucket.into(),
            max_image_bytes,
            image: None,
            location: None,
            outcome: None,
        }
    }

    pub fn state(&self) -> UploadState {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        match (&self.image, &self.location) {
            (_, Some(_)) => UploadState::LocationCaptured,
            (Some(_), None) => UploadState::ImageSelected,
            (None, None) => UploadState::Idle,
        }
    }

    pub fn image(&self) -> Option<&ImageFile> {
        self.image.as_ref()
    }

    pub fn location(&self) -> Option<&Position> {
        self.location.as_ref()
    }

    /// Upload is possible exactly when both an image and a location are held.
    pub fn can_upload(&self) -> bool {
        self.image.is_some() && self.location.is_some()
    }

    /// Hold `file` for upload. A rejected file leaves the flow untouched.
    pub fn select_image(&mut self, file: ImageFile) -> Result<(), UploadError> {
        if !file.is_image() {
            warn!(content_type = %file.content_type, "Rejected non-image file");
            return Err(UploadError::NotAnImage);
        }
        if file.is_empty() {
            return Err(UploadError::EmptyImage);
        }
        if file.len() > self.max_image_bytes {
            return Err(UploadError::TooLarge {
                max: self.max_image_bytes,
            });
        }

        self.outcome = None;
        self.image = Some(file);
        Ok(())
    }

    /// Request a fix and hold it. May be retried; a failure keeps any
    /// previously captured fix.
    pub async fn capture_location(
        &mut self,
        geolocator: &dyn Geolocator,
        options: &PositionOptions,
    ) -> Result<Position, LocationError> {
        match locate(geolocator, options).await {
            Ok(position) => {
                info!(
                    latitude = position.latitude,
                    longitude = position.longitude,
                    accuracy = ?position.accuracy,
                    "Location captured"
                );
                self.outcome = None;
                self.location = Some(position);
                Ok(position)
            }
            Err(e) => {
                warn!(error = %e, "Location capture failed");
                Err(e)
            }
        }
    }

    /// Store the image and write its metadata record.
    ///
    /// Ends in `Done` or `Failed`; either way the held image and location are
    /// released. If the record write fails after the object was stored, the
    /// object is removed again.
    pub async fn submit(
        &mut self,
        backend: &dyn Backend,
        access_token: &str,
    ) -> Result<CropImage, UploadError> {
        let (Some(image), Some(location)) = (self.image.as_ref(), self.location) else {
            return Err(UploadError::MissingPrerequisites);
        };
        let image = image.clone();

        self.outcome = Some(UploadState::Uploading);
        let result = self.store(backend, access_token, image, location).await;

        self.image = None;
        self.location = None;
        match &result {
            Ok(record) => {
                info!(record = %record.id, farmer = %record.farmer_id, "Crop image uploaded");
                self.outcome = Some(UploadState::Done);
            }
            Err(e) => {
                error!(error = %e, cause = ?std::error::Error::source(e), "Upload failed");
                self.outcome = Some(UploadState::Failed);
            }
        }
        result
    }

    async fn store(
        &self,
        backend: &dyn Backend,
        access_token: &str,
        image: ImageFile,
        location: Position,
    ) -> Result<CropImage, UploadError> {
        // The session may have lapsed between capture and submit
        let session = backend
            .get_session(access_token)
            .await
            .map_err(UploadError::Backend)?
            .ok_or_else(|| {
                warn!("Session expired before the image was stored");
                UploadError::SessionExpired
            })?;

        let name = object_name(&image.file_name, &image.content_type);
        backend
            .upload_object(&session, &self.bucket, &name, &image.content_type, image.bytes)
            .await
            .map_err(UploadError::Backend)?;

        let record = NewCropImage {
            farmer_id: session.user.id.clone(),
            image_url: backend.public_url(&self.bucket, &name),
            latitude: location.latitude,
            longitude: location.longitude,
        };

        match backend.insert_crop_image(&session, &record).await {
            Ok(stored) => Ok(stored),
            Err(e) => {
                if let Err(cleanup) = backend.remove_object(&session, &self.bucket, &name).await {
                    error!(object = %name, error = %cleanup, "Failed to remove orphaned object");
                } else {
                    warn!(object = %name, "Removed object after failed record insert");
                }
                Err(UploadError::Backend(e))
            }
        }
    }
}
