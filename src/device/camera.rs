use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::upload::ImageFile;

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Unable to access camera: {0}")]
    Access(String),
    #[error("Failed to capture image: {0}")]
    Capture(String),
}

/// A camera that can be opened for capture.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CameraStream>, CameraError>;
}

/// An open camera. Must be stopped once the frame is taken.
#[async_trait]
pub trait CameraStream: Send {
    async fn grab_frame(&mut self) -> Result<ImageFile, CameraError>;
    async fn stop(&mut self);
}

/// Open the camera, wait `delay` for it to settle, grab one frame and stop
/// the device. The device is stopped whether or not the grab succeeded.
pub async fn capture_photo(camera: &dyn Camera, delay: Duration) -> Result<ImageFile, CameraError> {
    let mut stream = camera.open().await.map_err(|e| {
        warn!(error = %e, "Camera access failed");
        e
    })?;

    tokio::time::sleep(delay).await;

    let frame = stream.grab_frame().await;
    stream.stop().await;

    if let Ok(image) = &frame {
        debug!(file = %image.file_name, bytes = image.len(), "Captured camera frame");
    }
    frame
}

/// A network camera that serves its current frame as an image over HTTP.
pub struct HttpSnapshotCamera {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotCamera {
    /// `timeout` bounds each request to the camera.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CameraError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CameraError::Access(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Camera for HttpSnapshotCamera {
    /// Check the camera with a HEAD request; the frame itself is fetched
    /// only after the settle delay.
    async fn open(&self) -> Result<Box<dyn CameraStream>, CameraError> {
        let response = self
            .client
            .head(&self.url)
            .send()
            .await
            .map_err(|e| CameraError::Access(e.to_string()))?;

        let status = response.status();
        // Some cameras only answer GET
        if !status.is_success() && status != reqwest::StatusCode::METHOD_NOT_ALLOWED {
            return Err(CameraError::Access(format!(
                "camera responded with {}",
                status
            )));
        }

        Ok(Box::new(SnapshotStream {
            client: self.client.clone(),
            url: self.url.clone(),
            stopped: false,
        }))
    }
}

struct SnapshotStream {
    client: reqwest::Client,
    url: String,
    stopped: bool,
}

#[async_trait]
impl CameraStream for SnapshotStream {
    async fn grab_frame(&mut self) -> Result<ImageFile, CameraError> {
        if self.stopped {
            return Err(CameraError::Capture("camera already stopped".to_string()));
        }

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CameraError::Capture(e.to_string()))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());

        if !content_type.starts_with("image/") {
            return Err(CameraError::Capture(format!(
                "camera returned {} instead of an image",
                content_type
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CameraError::Capture(e.to_string()))?;

        let extension = mime_guess::get_mime_extensions_str(&content_type)
            .and_then(|exts| exts.first().copied())
            .unwrap_or("jpg");
        let file_name = format!(
            "capture-{}.{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S"),
            extension
        );

        Ok(ImageFile::new(file_name, content_type, bytes))
    }

    async fn stop(&mut self) {
        self.stopped = true;
        debug!(url = %self.url, "Snapshot camera stopped");
    }
}
