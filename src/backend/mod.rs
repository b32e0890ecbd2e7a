//! The backend capability: authentication, the admin predicate, object
//! storage and structured storage.
//!
//! Everything the application persists goes through [`Backend`]. A handle is
//! created once at startup and passed explicitly to every flow.

mod local;
mod supabase;

pub use local::LocalBackend;
pub use supabase::SupabaseBackend;

#[cfg(test)]
pub(crate) use local::tests as test_support;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::config::{BackendKind, Config};
use crate::db::{AuthUser, CropImage, FarmerProfile, NewAccount, NewCropImage, Session};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Invalid login credentials")]
    InvalidCredentials,
    #[error("An account with this email already exists")]
    EmailTaken,
    #[error("Not authenticated")]
    Unauthorized,
    #[error("Permission denied")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{message}")]
    Remote { status: u16, message: String },
    #[error("Request to backend failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Internal(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Exchange email and password for a session.
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session>;

    /// Create an account together with its profile.
    async fn sign_up(&self, account: &NewAccount) -> BackendResult<AuthUser>;

    /// Resolve a token into its session. `Ok(None)` when the token is unknown
    /// or expired.
    async fn get_session(&self, access_token: &str) -> BackendResult<Option<Session>>;

    /// Revoke a session. Revoking an unknown token is not an error.
    async fn sign_out(&self, access_token: &str) -> BackendResult<()>;

    /// Server-side check whether `user_id` has administrative privileges.
    async fn is_admin(&self, session: &Session, user_id: &str) -> BackendResult<bool>;

    async fn upload_object(
        &self,
        session: &Session,
        bucket: &str,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> BackendResult<()>;

    /// Public URL of a stored object. Does not check that the object exists.
    fn public_url(&self, bucket: &str, name: &str) -> String;

    async fn remove_object(&self, session: &Session, bucket: &str, name: &str)
        -> BackendResult<()>;

    async fn insert_crop_image(
        &self,
        session: &Session,
        record: &NewCropImage,
    ) -> BackendResult<CropImage>;

    /// A farmer's own records, newest first, at most `limit`.
    async fn recent_crop_images(
        &self,
        session: &Session,
        farmer_id: &str,
        limit: u32,
    ) -> BackendResult<Vec<CropImage>>;

    /// All profiles ordered by name, each with its records newest first.
    async fn farmers_with_images(&self, session: &Session) -> BackendResult<Vec<FarmerProfile>>;
}

/// Build the backend selected by the configuration.
pub async fn connect(config: &Config) -> Result<Arc<dyn Backend>> {
    match config.backend.kind {
        BackendKind::Local => {
            let backend = LocalBackend::open(config).await?;
            if let (Some(email), Some(password)) =
                (&config.auth.admin_email, &config.auth.admin_password)
            {
                backend.ensure_admin_user(email, password).await?;
            }
            Ok(Arc::new(backend))
        }
        BackendKind::Supabase => Ok(Arc::new(SupabaseBackend::new(&config.backend)?)),
    }
}
