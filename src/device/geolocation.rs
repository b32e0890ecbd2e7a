use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A location fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters, when the platform reports one
    pub accuracy: Option<f64>,
    /// When the fix was taken (cached fixes can be older than the request)
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_accuracy(mut self, accuracy: Option<f64>) -> Self {
        self.accuracy = accuracy;
        self
    }

    fn has_valid_coordinates(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Options for a fix request, mirroring what browsers accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::from_secs(30),
        }
    }
}

/// Why a fix could not be obtained. The display text is shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("Please allow location access in your browser settings")]
    PermissionDenied,
    #[error("Location information is unavailable")]
    PositionUnavailable,
    #[error("Location request timed out")]
    Timeout,
    #[error("Geolocation is not supported by your browser")]
    Unsupported,
    #[error("Unable to get location")]
    Unknown,
}

impl LocationError {
    /// Map a platform error code (1 = denied, 2 = unavailable, 3 = timeout).
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => LocationError::PermissionDenied,
            2 => LocationError::PositionUnavailable,
            3 => LocationError::Timeout,
            _ => LocationError::Unknown,
        }
    }
}

/// Anything that can produce a location fix.
#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn current_position(&self, options: &PositionOptions) -> Result<Position, LocationError>;
}

/// Request a fix, bounded by `options.timeout`.
///
/// A fix older than `options.maximum_age` counts as a timeout: no fresh
/// enough position arrived. Out-of-range coordinates count as unavailable.
pub async fn locate(
    geolocator: &dyn Geolocator,
    options: &PositionOptions,
) -> Result<Position, LocationError> {
    let position = tokio::time::timeout(options.timeout, geolocator.current_position(options))
        .await
        .map_err(|_| LocationError::Timeout)??;

    if !position.has_valid_coordinates() {
        return Err(LocationError::PositionUnavailable);
    }

    // A negative age (fix stamped slightly in the future) is accepted
    if let Ok(age) = (Utc::now() - position.timestamp).to_std() {
        if age > options.maximum_age {
            return Err(LocationError::Timeout);
        }
    }

    Ok(position)
}

/// A fix reported by a browser alongside a form submission.
///
/// The page runs the platform geolocation request and posts either the
/// coordinates or the platform error code it received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportedFix {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: Option<i64>,
    pub error_code: Option<u16>,
}

#[async_trait]
impl Geolocator for ReportedFix {
    async fn current_position(&self, _options: &PositionOptions) -> Result<Position, LocationError> {
        if let Some(code) = self.error_code {
            return Err(LocationError::from_code(code));
        }

        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => {
                let timestamp = match self.timestamp_ms {
                    Some(ms) => DateTime::from_timestamp_millis(ms)
                        .ok_or(LocationError::PositionUnavailable)?,
                    None => Utc::now(),
                };
                Ok(Position {
                    latitude,
                    longitude,
                    accuracy: self.accuracy,
                    timestamp,
                })
            }
            _ => Err(LocationError::PositionUnavailable),
        }
    }
}

/// A fix known up front, e.g. coordinates passed on the command line.
#[derive(Debug, Clone, Copy)]
pub struct FixedPosition(pub Position);

#[async_trait]
impl Geolocator for FixedPosition {
    async fn current_position(&self, _options: &PositionOptions) -> Result<Position, LocationError> {
        Ok(self.0)
    }
}
