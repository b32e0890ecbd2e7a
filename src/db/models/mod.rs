//! Database models split into domain-specific modules.

pub mod crop_image;
pub mod user;

pub use crop_image::*;
pub use user::*;
