use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::device::PositionOptions;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub geolocation: GeolocationConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Base URL the browser uses to reach this server. Public object URLs of
    /// the local backend are built from it.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            public_url: default_public_url(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SQLite + filesystem storage inside the data directory
    #[default]
    Local,
    /// Hosted backend-as-a-service reached over its REST endpoints
    Supabase,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Project URL of the hosted backend (e.g. https://xyz.supabase.co)
    pub url: Option<String>,
    /// Public anon key sent as `apikey` on every hosted request
    pub anon_key: Option<String>,
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            url: None,
            anon_key: None,
            timeout_secs: default_backend_timeout(),
        }
    }
}

fn default_backend_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
        }
    }
}

fn default_bucket() -> String {
    "crop_images".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    /// Admin account seeded into the local backend on startup
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    /// Mark the session cookie `Secure` (enable behind HTTPS)
    #[serde(default)]
    pub secure_cookies: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
            admin_email: None,
            admin_password: None,
            secure_cookies: false,
        }
    }
}

fn default_session_ttl_hours() -> i64 {
    24 * 7
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeolocationConfig {
    #[serde(default = "default_true")]
    pub enable_high_accuracy: bool,
    /// How long a fix request may take before it counts as timed out
    #[serde(default = "default_geo_timeout_ms")]
    pub timeout_ms: u64,
    /// Oldest cached fix still accepted
    #[serde(default = "default_geo_maximum_age_ms")]
    pub maximum_age_ms: u64,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout_ms: default_geo_timeout_ms(),
            maximum_age_ms: default_geo_maximum_age_ms(),
        }
    }
}

impl GeolocationConfig {
    pub fn position_options(&self) -> PositionOptions {
        PositionOptions {
            enable_high_accuracy: self.enable_high_accuracy,
            timeout: Duration::from_millis(self.timeout_ms),
            maximum_age: Duration::from_millis(self.maximum_age_ms),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_geo_timeout_ms() -> u64 {
    10_000
}

fn default_geo_maximum_age_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Delay between opening the camera and grabbing the frame
    #[serde(default = "default_capture_delay_ms")]
    pub capture_delay_ms: u64,
    /// Per-request limit when talking to a network camera
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_secs: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            capture_delay_ms: default_capture_delay_ms(),
            snapshot_timeout_secs: default_snapshot_timeout(),
        }
    }
}

impl CameraConfig {
    pub fn capture_delay(&self) -> Duration {
        Duration::from_millis(self.capture_delay_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_timeout_secs)
    }
}

fn default_snapshot_timeout() -> u64 {
    10
}

fn default_capture_delay_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    #[serde(default = "default_recent_limit")]
    pub recent_limit: u32,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
        }
    }
}

fn default_recent_limit() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Login and registration attempts per window
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_upload_requests")]
    pub upload_requests_per_window: u32,
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Seconds between sweeps of stale limiter entries
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auth_requests_per_window: default_auth_requests(),
            upload_requests_per_window: default_upload_requests(),
            api_requests_per_window: default_api_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_auth_requests() -> u32 {
    20
}

fn default_upload_requests() -> u32 {
    30
}

fn default_api_requests() -> u32 {
    120
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Secrets are usually kept out of the config file.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("FARMCONNECT_ANON_KEY") {
            self.backend.anon_key = Some(key);
        }
        if let Ok(password) = std::env::var("FARMCONNECT_ADMIN_PASSWORD") {
            self.auth.admin_password = Some(password);
        }
    }

    /// Check the configuration for settings that cannot work together.
    /// Returns one message per problem; an empty list means the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.backend.kind == BackendKind::Supabase {
            if self.backend.url.as_deref().map_or(true, str::is_empty) {
                problems.push("backend.url is required for the supabase backend".to_string());
            }
            if self.backend.anon_key.as_deref().map_or(true, str::is_empty) {
                problems.push(
                    "backend.anon_key (or FARMCONNECT_ANON_KEY) is required for the supabase backend"
                        .to_string(),
                );
            }
        }

        if self.storage.bucket.trim().is_empty() {
            problems.push("storage.bucket must not be empty".to_string());
        }
        if self.auth.session_ttl_hours <= 0 {
            problems.push("auth.session_ttl_hours must be positive".to_string());
        }
        if self.auth.admin_email.is_some() != self.auth.admin_password.is_some() {
            problems.push("auth.admin_email and auth.admin_password must be set together".to_string());
        }
        if self.upload.max_image_bytes == 0 {
            problems.push("upload.max_image_bytes must be positive".to_string());
        }
        if self.geolocation.timeout_ms == 0 {
            problems.push("geolocation.timeout_ms must be positive".to_string());
        }
        if self.camera.snapshot_timeout_secs == 0 {
            problems.push("camera.snapshot_timeout_secs must be positive".to_string());
        }
        if self.listing.recent_limit == 0 {
            problems.push("listing.recent_limit must be at least 1".to_string());
        }
        if self.rate_limit.window_seconds == 0 {
            problems.push("rate_limit.window_seconds must be positive".to_string());
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_browser_geolocation_options() {
        let config = Config::default();
        let options = config.geolocation.position_options();
        assert!(options.enable_high_accuracy);
        assert_eq!(options.timeout, Duration::from_secs(10));
        assert_eq!(options.maximum_age, Duration::from_secs(30));
        assert_eq!(config.storage.bucket, "crop_images");
        assert_eq!(config.listing.recent_limit, 5);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9000

            [backend]
            kind = "supabase"
            url = "https://example.supabase.co"
            anon_key = "anon"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.backend.kind, BackendKind::Supabase);
        assert_eq!(config.backend.timeout_secs, 30);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_supabase_without_credentials_is_invalid() {
        let config = Config::from_toml("[backend]\nkind = \"supabase\"\n").unwrap();
        let problems = config.validate();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("backend.url"));
    }

    #[test]
    fn test_half_configured_admin_is_invalid() {
        let config = Config::from_toml("[auth]\nadmin_email = \"admin@farm.test\"\n").unwrap();
        assert!(config
            .validate()
            .iter()
            .any(|p| p.contains("admin_password")));
    }

    #[test]
    fn test_unknown_backend_kind_is_rejected() {
        assert!(Config::from_toml("[backend]\nkind = \"firebase\"\n").is_err());
    }
}
