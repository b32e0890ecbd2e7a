//! Device capabilities used by the upload flow.
//!
//! Location fixes and camera frames come from the platform (a browser, a
//! network camera, command-line arguments). Each capability sits behind a
//! trait with explicit error kinds so flows can be driven by fakes in tests.

mod camera;
mod geolocation;

pub use camera::{capture_photo, Camera, CameraError, CameraStream, HttpSnapshotCamera};
pub use geolocation::{
    locate, FixedPosition, Geolocator, LocationError, Position, PositionOptions, ReportedFix,
};
