// Crop upload API
//
// Multipart parsing here is shared with the dashboard form.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::auth::CurrentSession;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::validate_coordinates;
use crate::config::GeolocationConfig;
use crate::db::CropImage;
use crate::device::{PositionOptions, ReportedFix};
use crate::listing;
use crate::upload::{ImageFile, UploadFlow};
use crate::AppState;

/// Fields of an upload submission.
#[derive(Debug, Default)]
pub struct UploadSubmission {
    pub image: Option<ImageFile>,
    pub fix: ReportedFix,
}

fn parse_number<T: std::str::FromStr>(
    errors: &mut ValidationErrorBuilder,
    field: &str,
    value: &str,
) -> Option<T> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            errors.add(field, format!("{} must be a number", field));
            None
        }
    }
}

/// Read the multipart body: `image`, `latitude`, `longitude`, `accuracy`,
/// `fix_timestamp` and `location_error`. Unknown fields are ignored.
pub async fn read_submission(mut multipart: Multipart) -> Result<UploadSubmission, ApiError> {
    let mut submission = UploadSubmission::default();
    let mut errors = ValidationErrorBuilder::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "image" {
            let file_name = field.file_name().unwrap_or("image").to_string();
            let content_type = field
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| {
                    mime_guess::from_path(&file_name)
                        .first_or_octet_stream()
                        .essence_str()
                        .to_string()
                });
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read image: {}", e)))?;
            // Browsers send an empty part when no file was chosen
            if !(bytes.is_empty() && file_name.is_empty()) {
                submission.image = Some(ImageFile::new(file_name, content_type, bytes));
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid field {}: {}", name, e)))?;

        match name.as_str() {
            "latitude" => submission.fix.latitude = parse_number(&mut errors, "latitude", &value),
            "longitude" => submission.fix.longitude = parse_number(&mut errors, "longitude", &value),
            "accuracy" => submission.fix.accuracy = parse_number(&mut errors, "accuracy", &value),
            "fix_timestamp" => {
                submission.fix.timestamp_ms = parse_number(&mut errors, "fix_timestamp", &value)
            }
            "location_error" => {
                submission.fix.error_code = parse_number(&mut errors, "location_error", &value)
            }
            other => debug!(field = other, "Ignoring unknown upload field"),
        }
    }

    if let (Some(lat), Some(lon)) = (submission.fix.latitude, submission.fix.longitude) {
        errors.check("location", validate_coordinates(lat, lon));
    }
    errors.finish()?;

    Ok(submission)
}

/// Options for a fix that arrives with the form. The page already applied
/// the freshness tolerance when it acquired the fix.
pub fn submitted_fix_options(config: &GeolocationConfig) -> PositionOptions {
    PositionOptions {
        maximum_age: Duration::MAX,
        ..config.position_options()
    }
}

/// Run one upload attempt for a parsed submission.
pub async fn process_submission(
    state: &AppState,
    access_token: &str,
    submission: UploadSubmission,
) -> Result<CropImage, ApiError> {
    let mut flow = UploadFlow::new(&state.config.storage.bucket, state.config.upload.max_image_bytes);

    let Some(image) = submission.image else {
        return Err(ApiError::validation_field(
            "image",
            "Please select an image and capture location",
        ));
    };
    flow.select_image(image)?;

    if submission.fix == ReportedFix::default() {
        return Err(ApiError::validation_field(
            "location",
            "Please select an image and capture location",
        ));
    }
    flow.capture_location(
        &submission.fix,
        &submitted_fix_options(&state.config.geolocation),
    )
    .await?;

    Ok(flow.submit(state.backend.as_ref(), access_token).await?)
}

#[derive(Debug, Serialize)]
pub struct RecentUploadsResponse {
    pub uploads: Vec<CropImage>,
    pub total: usize,
}

/// The caller's most recent uploads
///
/// GET /api/uploads/recent
pub async fn recent(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<RecentUploadsResponse>, ApiError> {
    let uploads = listing::recent_uploads(
        state.backend.as_ref(),
        &session,
        state.config.listing.recent_limit,
    )
    .await?;
    let total = uploads.len();

    Ok(Json(RecentUploadsResponse { uploads, total }))
}

/// Upload a crop image with its location
///
/// POST /api/uploads
pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CropImage>), ApiError> {
    let submission = read_submission(multipart).await?;
    let record = process_submission(&state, &session.access_token, submission).await?;
    Ok((StatusCode::CREATED, Json(record)))
}
