// Askama template definitions

use askama::Template;

use super::Flash;
use crate::config::Config;
use crate::db::{CropImage, FarmerProfile};

/// Custom filters for Askama templates
mod filters {
    /// Initials for the avatar badge on farmer cards
    pub fn initials(s: &str) -> ::askama::Result<String> {
        Ok(s.split_whitespace()
            .filter_map(|w| w.chars().next())
            .take(2)
            .flat_map(char::to_uppercase)
            .collect())
    }
}

/// Client-side device settings rendered into the dashboard script.
pub struct DeviceSettings {
    pub enable_high_accuracy: bool,
    pub timeout_ms: u64,
    pub maximum_age_ms: u64,
    pub capture_delay_ms: u64,
    pub max_image_bytes: usize,
}

impl DeviceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enable_high_accuracy: config.geolocation.enable_high_accuracy,
            timeout_ms: config.geolocation.timeout_ms,
            maximum_age_ms: config.geolocation.maximum_age_ms,
            capture_delay_ms: config.camera.capture_delay_ms,
            max_image_bytes: config.upload.max_image_bytes,
        }
    }
}

// Values echoed back into the registration form after a failed submit
#[derive(Debug, Default)]
pub struct RegisterValues {
    pub full_name: String,
    pub email: String,
    pub phone: String,
}

// Login template
#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub flash: Option<Flash>,
    pub email: String,
    pub version: String,
}

// Registration template
#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub flash: Option<Flash>,
    pub values: RegisterValues,
    pub errors: Vec<String>,
    pub version: String,
}

// Farmer dashboard template
#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardTemplate {
    pub flash: Option<Flash>,
    pub email: String,
    pub uploads: Vec<CropImage>,
    pub uploads_error: Option<String>,
    pub device: DeviceSettings,
    pub version: String,
}

// Admin farmer directory template
#[derive(Template)]
#[template(path = "admin.html")]
pub struct AdminTemplate {
    pub flash: Option<Flash>,
    pub query: String,
    pub total: usize,
    pub farmers: Vec<FarmerProfile>,
    pub load_error: Option<String>,
    pub empty_message: Option<&'static str>,
    pub version: String,
}
