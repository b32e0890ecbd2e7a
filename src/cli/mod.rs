//! CLI module for the FarmConnect command-line interface.
//!
//! Subcommands work directly against the configured backend:
//! - `serve` - Run the web server (the default)
//! - `upload` - Upload a crop photo from a file or a network camera
//! - `recent` - List your most recent uploads
//! - `farmers` - Search the farmer directory (admins only)
//! - `config check` - Validate configuration file

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::validation::validate_coordinates;
use crate::auth::{self, LoginForm};
use crate::backend::{self, Backend};
use crate::config::{BackendKind, Config};
use crate::db::Session;
use crate::device::{capture_photo, FixedPosition, HttpSnapshotCamera, Position};
use crate::listing;
use crate::upload::{ImageFile, UploadFlow};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "farmconnect")]
#[command(author, version, about = "Geotagged crop photo uploads for farmers", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "farmconnect.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the web server
    Serve,

    /// Upload a crop photo tagged with a location
    Upload(UploadArgs),

    /// List your most recent uploads
    Recent {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Search the farmer directory by name or phone
    Farmers {
        #[command(flatten)]
        credentials: Credentials,
        /// Search term
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
pub struct Credentials {
    /// Account email
    #[arg(long, env = "FARMCONNECT_EMAIL")]
    pub email: String,

    /// Account password
    #[arg(long, env = "FARMCONNECT_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    #[command(flatten)]
    pub credentials: Credentials,

    /// Image file to upload
    #[arg(long, conflicts_with = "camera_url", required_unless_present = "camera_url")]
    pub image: Option<PathBuf>,

    /// Snapshot URL of a network camera to capture from instead
    #[arg(long)]
    pub camera_url: Option<String>,

    /// Latitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    /// Longitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lon: f64,

    /// Horizontal accuracy in meters
    #[arg(long)]
    pub accuracy: Option<f64>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// Run a CLI command
pub async fn run_command(cli: &Cli, config: Config) -> Result<()> {
    match &cli.command {
        Some(Commands::Upload(args)) => cmd_upload(&config, args).await,
        Some(Commands::Recent { credentials }) => cmd_recent(&config, credentials).await,
        Some(Commands::Farmers { credentials, query }) => {
            cmd_farmers(&config, credentials, query.as_deref()).await
        }
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli),
        Some(Commands::Serve) | None => {
            // Starting the server is handled in main.rs
            Ok(())
        }
    }
}

/// Connect to the backend and sign in
async fn sign_in(config: &Config, credentials: &Credentials) -> Result<(Arc<dyn Backend>, Session)> {
    let backend = backend::connect(config).await?;
    let form = LoginForm {
        email: credentials.email.clone(),
        password: credentials.password.clone(),
    };
    let outcome = auth::login(backend.as_ref(), &form).await?;
    Ok((backend, outcome.session))
}

async fn sign_out(backend: &dyn Backend, session: &Session) {
    if let Err(e) = auth::logout(backend, &session.access_token).await {
        tracing::warn!(error = %e, "Failed to sign out");
    }
}

/// Upload one crop photo
async fn cmd_upload(config: &Config, args: &UploadArgs) -> Result<()> {
    let (backend, session) = sign_in(config, &args.credentials).await?;
    let result = upload(config, backend.as_ref(), &session, args).await;
    sign_out(backend.as_ref(), &session).await;
    result
}

async fn upload(
    config: &Config,
    backend: &dyn Backend,
    session: &Session,
    args: &UploadArgs,
) -> Result<()> {
    let image = match (&args.image, &args.camera_url) {
        (Some(path), _) => ImageFile::from_path(path)
            .await
            .with_context(|| format!("Failed to read image {}", path.display()))?,
        (None, Some(url)) => {
            println!(
                "Capturing from camera in {} ms...",
                config.camera.capture_delay_ms
            );
            let camera = HttpSnapshotCamera::new(url.as_str(), config.camera.snapshot_timeout())?;
            capture_photo(&camera, config.camera.capture_delay()).await?
        }
        (None, None) => anyhow::bail!("Either --image or --camera-url is required"),
    };

    validate_coordinates(args.lat, args.lon).map_err(anyhow::Error::msg)?;

    let mut flow = UploadFlow::new(&config.storage.bucket, config.upload.max_image_bytes);
    flow.select_image(image)?;

    let fix = FixedPosition(Position::new(args.lat, args.lon).with_accuracy(args.accuracy));
    flow.capture_location(&fix, &config.geolocation.position_options())
        .await?;

    let record = flow.submit(backend, &session.access_token).await?;

    println!("[OK] Crop image uploaded successfully!");
    println!("  ID:        {}", record.id);
    println!("  Location:  {}", record.coordinates());
    println!("  URL:       {}", record.image_url);
    Ok(())
}

/// List the caller's recent uploads
async fn cmd_recent(config: &Config, credentials: &Credentials) -> Result<()> {
    let (backend, session) = sign_in(config, credentials).await?;
    let uploads =
        listing::recent_uploads(backend.as_ref(), &session, config.listing.recent_limit).await;
    sign_out(backend.as_ref(), &session).await;
    let uploads = uploads.context("Failed to load recent uploads")?;

    if uploads.is_empty() {
        println!("No uploads yet.");
        return Ok(());
    }

    println!();
    println!("{:<12}  {:<24}  {}", "DATE", "LOCATION", "IMAGE");
    println!("{}", "-".repeat(100));
    for upload in uploads {
        println!(
            "{:<12}  {:<24}  {}",
            upload.uploaded_on(),
            truncate(&upload.coordinates(), 24),
            upload.image_url
        );
    }
    println!();
    Ok(())
}

/// Search the farmer directory
async fn cmd_farmers(config: &Config, credentials: &Credentials, query: Option<&str>) -> Result<()> {
    let (backend, session) = sign_in(config, credentials).await?;
    let result = farmers(backend.as_ref(), &session, query).await;
    sign_out(backend.as_ref(), &session).await;
    result
}

async fn farmers(backend: &dyn Backend, session: &Session, query: Option<&str>) -> Result<()> {
    let is_admin = backend
        .is_admin(session, &session.user.id)
        .await
        .context("Error verifying admin status")?;
    if !is_admin {
        anyhow::bail!("Admin access required");
    }

    let directory = listing::farmer_directory(backend, session, query)
        .await
        .context("Error loading farmer data")?;

    if let Some(message) = directory.empty_message() {
        println!("{}", message);
        return Ok(());
    }

    println!();
    println!("{:<30}  {:<20}  {}", "NAME", "PHONE", "UPLOADS");
    println!("{}", "-".repeat(64));
    for farmer in &directory.farmers {
        println!(
            "{:<30}  {:<20}  {}",
            truncate(&farmer.full_name, 30),
            truncate(farmer.phone_display(), 20),
            farmer.crop_images.len()
        );
    }
    println!();
    println!("{} of {} farmers", directory.farmers.len(), directory.total);
    Ok(())
}

/// Validate the configuration file
fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("A default configuration will be used when starting the server.");
        println!("To create a custom configuration, copy farmconnect.example.toml to farmconnect.toml");
        return Ok(());
    }

    match Config::load(config_path) {
        Ok(config) => {
            let problems = config.validate();
            if problems.is_empty() {
                println!("[OK] Configuration file is valid!");
            } else {
                println!("[!!] Configuration file has problems:");
                for problem in &problems {
                    println!("  - {}", problem);
                }
            }
            println!();
            println!("=== Configuration Summary ===");
            println!();
            println!("Server:");
            println!("  Address:      {}:{}", config.server.host, config.server.port);
            println!("  Public URL:   {}", config.server.public_url);
            println!("  Data Dir:     {}", config.server.data_dir.display());
            println!();
            println!("Backend:");
            match config.backend.kind {
                BackendKind::Local => println!("  Type:         local (SQLite + filesystem)"),
                BackendKind::Supabase => {
                    println!("  Type:         supabase");
                    println!(
                        "  URL:          {}",
                        config.backend.url.as_deref().unwrap_or("-")
                    );
                }
            }
            println!("  Bucket:       {}", config.storage.bucket);
            println!();
            println!("Uploads:");
            println!("  Max Size:     {}", format_bytes(config.upload.max_image_bytes as u64));
            println!(
                "  Geolocation:  timeout {} ms, max age {} ms",
                config.geolocation.timeout_ms, config.geolocation.maximum_age_ms
            );
            println!(
                "  Rate Limiting: {}",
                if config.rate_limit.enabled {
                    "Enabled"
                } else {
                    "Disabled"
                }
            );
            println!();

            let mut warnings = Vec::new();
            if !config.auth.secure_cookies && config.server.public_url.starts_with("https://") {
                warnings.push("Public URL is HTTPS but auth.secure_cookies is off");
            }
            if config.backend.kind == BackendKind::Local && config.auth.admin_email.is_none() {
                warnings.push("No admin account configured - the farmer directory is unreachable");
            }
            if !warnings.is_empty() {
                println!("Warnings:");
                for warning in warnings {
                    println!("  [!] {}", warning);
                }
                println!();
            }

            if problems.is_empty() {
                Ok(())
            } else {
                anyhow::bail!("Invalid configuration file")
            }
        }
        Err(e) => {
            println!("[!!] Configuration file is invalid!");
            println!();
            println!("Error: {}", e);
            println!();
            println!("Please check the configuration file syntax and try again.");
            anyhow::bail!("Invalid configuration file");
        }
    }
}

/// Format bytes to human-readable string
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Truncate a string to max length with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_server() {
        let cli = Cli::try_parse_from(["farmconnect"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("farmconnect.toml"));
    }

    #[test]
    fn test_upload_accepts_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "farmconnect",
            "upload",
            "--email",
            "amina@farm.test",
            "--password",
            "secret-pass",
            "--image",
            "field.jpg",
            "--lat",
            "-1.2921",
            "--lon",
            "36.8219",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Upload(args)) => {
                assert_eq!(args.lat, -1.2921);
                assert_eq!(args.image, Some(PathBuf::from("field.jpg")));
                assert!(args.accuracy.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_upload_requires_an_image_source() {
        let result = Cli::try_parse_from([
            "farmconnect",
            "upload",
            "--email",
            "a@farm.test",
            "--password",
            "x",
            "--lat",
            "1",
            "--lon",
            "2",
        ]);
        assert!(result.is_err());

        let result = Cli::try_parse_from([
            "farmconnect",
            "upload",
            "--email",
            "a@farm.test",
            "--password",
            "x",
            "--image",
            "a.jpg",
            "--camera-url",
            "http://cam.local/snapshot.jpg",
            "--lat",
            "1",
            "--lon",
            "2",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Wanjiru Kamau Njeri", 10), "Wanjiru...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.0 MB");
    }

    #[tokio::test]
    async fn test_upload_from_file_against_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("field.jpg");
        std::fs::write(&image_path, [0xff, 0xd8, 0xff, 0xe0]).unwrap();

        let mut config = Config::default();
        config.server.data_dir = dir.path().join("data");

        let backend = backend::connect(&config).await.unwrap();
        backend
            .sign_up(&crate::db::NewAccount {
                email: "amina@farm.test".to_string(),
                password: "secret-pass".to_string(),
                full_name: "Amina".to_string(),
                phone: "0711000111".to_string(),
            })
            .await
            .unwrap();
        let session = backend.sign_in("amina@farm.test", "secret-pass").await.unwrap();

        let args = UploadArgs {
            credentials: Credentials {
                email: "amina@farm.test".to_string(),
                password: "secret-pass".to_string(),
            },
            image: Some(image_path),
            camera_url: None,
            lat: -0.5,
            lon: 37.0,
            accuracy: Some(5.0),
        };
        upload(&config, backend.as_ref(), &session, &args).await.unwrap();

        let recent = backend
            .recent_crop_images(&session, &session.user.id, 5)
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].longitude, 37.0);
    }

    #[tokio::test]
    async fn test_farmers_requires_admin() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.data_dir = dir.path().to_path_buf();

        let backend = backend::connect(&config).await.unwrap();
        backend
            .sign_up(&crate::db::NewAccount {
                email: "amina@farm.test".to_string(),
                password: "secret-pass".to_string(),
                full_name: "Amina".to_string(),
                phone: "0711000111".to_string(),
            })
            .await
            .unwrap();
        let session = backend.sign_in("amina@farm.test", "secret-pass").await.unwrap();

        let err = farmers(backend.as_ref(), &session, None).await.unwrap_err();
        assert_eq!(err.to_string(), "Admin access required");
    }
}
