//! Self-hosted backend: SQLite for accounts, sessions and records, the
//! filesystem for objects.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{Backend, BackendError, BackendResult};
use crate::config::Config;
use crate::db::{
    self, AuthUser, CropImage, DbPool, FarmerProfile, NewAccount, NewCropImage, Role, Session,
    SessionRow, User,
};

pub struct LocalBackend {
    db: DbPool,
    storage_root: PathBuf,
    public_url: String,
    session_ttl: chrono::Duration,
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random session token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Object keys and bucket names must be a single plain path component.
fn plain_component(value: &str) -> BackendResult<&str> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !value.contains(['/', '\\']) => Ok(value),
        _ => Err(BackendError::Internal(format!(
            "invalid storage path component: {:?}",
            value
        ))),
    }
}

impl LocalBackend {
    pub fn new(db: DbPool, storage_root: PathBuf, public_url: &str, session_ttl_hours: i64) -> Self {
        Self {
            db,
            storage_root,
            public_url: public_url.trim_end_matches('/').to_string(),
            session_ttl: chrono::Duration::hours(session_ttl_hours),
        }
    }

    /// Open the database and storage directory under `server.data_dir`.
    pub async fn open(config: &Config) -> Result<Self> {
        let data_dir = &config.server.data_dir;
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let db = db::init(data_dir).await?;

        let storage_root = Self::storage_root_in(data_dir);
        std::fs::create_dir_all(&storage_root).with_context(|| {
            format!("Failed to create storage directory {}", storage_root.display())
        })?;

        Ok(Self::new(
            db,
            storage_root,
            &config.server.public_url,
            config.auth.session_ttl_hours,
        ))
    }

    /// Where objects live for a given data directory; the server exposes it
    /// under `/storage`.
    pub fn storage_root_in(data_dir: &Path) -> PathBuf {
        data_dir.join("storage")
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    /// Make sure the configured admin account exists and carries the admin role.
    pub async fn ensure_admin_user(&self, email: &str, password: &str) -> Result<()> {
        let email = email.trim().to_lowercase();
        let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.db)
            .await?;

        match existing {
            Some(user) if user.is_admin() => {}
            Some(user) => {
                sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
                    .bind(Role::Admin.as_str())
                    .bind(timestamp(Utc::now()))
                    .bind(&user.id)
                    .execute(&self.db)
                    .await?;
                info!("Granted admin role to {}", email);
            }
            None => {
                let account = NewAccount {
                    email: email.clone(),
                    password: password.to_string(),
                    full_name: "Administrator".to_string(),
                    phone: String::new(),
                };
                self.create_user(&account, Role::Admin)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to create admin user: {}", e))?;
                info!("Created admin user {}", email);
            }
        }

        Ok(())
    }

    async fn create_user(&self, account: &NewAccount, role: Role) -> BackendResult<User> {
        let password_hash = hash_password(&account.password)
            .map_err(|e| BackendError::Internal(format!("Failed to hash password: {}", e)))?;
        let now = timestamp(Utc::now());

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: account.email.trim().to_lowercase(),
            password_hash,
            full_name: account.full_name.clone(),
            phone: account.phone.clone(),
            role: role.as_str().to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, full_name, phone, role, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(&user.phone)
        .bind(&user.role)
        .bind(&user.created_at)
        .bind(&user.updated_at)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(user),
            Err(sqlx::Error::Database(e)) if e.message().contains("UNIQUE constraint failed") => {
                Err(BackendError::EmailTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user(&self, user_id: &str) -> BackendResult<Option<User>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?)
    }

    /// The session must still be live; returns its user.
    async fn require_user(&self, session: &Session) -> BackendResult<User> {
        let live = self
            .get_session(&session.access_token)
            .await?
            .ok_or(BackendError::Unauthorized)?;
        self.find_user(&live.user.id)
            .await?
            .ok_or(BackendError::Unauthorized)
    }

    fn object_path(&self, bucket: &str, name: &str) -> BackendResult<PathBuf> {
        Ok(self
            .storage_root
            .join(plain_component(bucket)?)
            .join(plain_component(name)?))
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.db)
            .await?;

        let user = user.ok_or(BackendError::InvalidCredentials)?;
        if !verify_password(password, &user.password_hash) {
            return Err(BackendError::InvalidCredentials);
        }

        let now = Utc::now();
        let swept = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(timestamp(now))
            .execute(&self.db)
            .await?
            .rows_affected();
        if swept > 0 {
            debug!(swept, "Removed expired sessions");
        }

        let token = generate_token();
        let expires_at = now + self.session_ttl;

        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&user.id)
        .bind(hash_token(&token))
        .bind(timestamp(expires_at))
        .bind(timestamp(now))
        .execute(&self.db)
        .await?;

        debug!(user_id = %user.id, "Session created");

        Ok(Session {
            access_token: token,
            user: AuthUser::from(&user),
            expires_at,
        })
    }

    async fn sign_up(&self, account: &NewAccount) -> BackendResult<AuthUser> {
        let user = self.create_user(account, Role::Farmer).await?;
        info!(user_id = %user.id, "Registered new farmer");
        Ok(AuthUser::from(&user))
    }

    async fn get_session(&self, access_token: &str) -> BackendResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ?")
            .bind(hash_token(access_token))
            .fetch_optional(&self.db)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at = DateTime::parse_from_rfc3339(&row.expires_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| BackendError::Internal(format!("Corrupt session expiry: {}", e)))?;

        if expires_at <= Utc::now() {
            sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(&row.id)
                .execute(&self.db)
                .await?;
            debug!(user_id = %row.user_id, "Expired session removed");
            return Ok(None);
        }

        let Some(user) = self.find_user(&row.user_id).await? else {
            return Ok(None);
        };

        Ok(Some(Session {
            access_token: access_token.to_string(),
            user: AuthUser::from(&user),
            expires_at,
        }))
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(hash_token(access_token))
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn is_admin(&self, _session: &Session, user_id: &str) -> BackendResult<bool> {
        Ok(self
            .find_user(user_id)
            .await?
            .map(|user| user.is_admin())
            .unwrap_or(false))
    }

    async fn upload_object(
        &self,
        session: &Session,
        bucket: &str,
        name: &str,
        _content_type: &str,
        data: Bytes,
    ) -> BackendResult<()> {
        self.require_user(session).await?;

        let path = self.object_path(bucket, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(BackendError::Remote {
                    status: 409,
                    message: "The resource already exists".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&data).await?;
        file.flush().await?;

        debug!(bucket, object = name, bytes = data.len(), "Object stored");
        Ok(())
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        format!("{}/storage/{}/{}", self.public_url, bucket, name)
    }

    async fn remove_object(
        &self,
        session: &Session,
        bucket: &str,
        name: &str,
    ) -> BackendResult<()> {
        self.require_user(session).await?;

        let path = self.object_path(bucket, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackendError::NotFound(format!("Object {}/{}", bucket, name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_crop_image(
        &self,
        session: &Session,
        record: &NewCropImage,
    ) -> BackendResult<CropImage> {
        let user = self.require_user(session).await?;
        if user.id != record.farmer_id {
            return Err(BackendError::Forbidden);
        }

        let image = CropImage {
            id: uuid::Uuid::new_v4().to_string(),
            farmer_id: record.farmer_id.clone(),
            image_url: record.image_url.clone(),
            latitude: record.latitude,
            longitude: record.longitude,
            created_at: timestamp(Utc::now()),
        };

        sqlx::query(
            r#"
            INSERT INTO crop_images (id, farmer_id, image_url, latitude, longitude, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&image.id)
        .bind(&image.farmer_id)
        .bind(&image.image_url)
        .bind(image.latitude)
        .bind(image.longitude)
        .bind(&image.created_at)
        .execute(&self.db)
        .await?;

        Ok(image)
    }

    async fn recent_crop_images(
        &self,
        session: &Session,
        farmer_id: &str,
        limit: u32,
    ) -> BackendResult<Vec<CropImage>> {
        let user = self.require_user(session).await?;
        if user.id != farmer_id && !user.is_admin() {
            return Err(BackendError::Forbidden);
        }

        Ok(sqlx::query_as(
            "SELECT * FROM crop_images WHERE farmer_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(farmer_id)
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await?)
    }

    async fn farmers_with_images(&self, session: &Session) -> BackendResult<Vec<FarmerProfile>> {
        let user = self.require_user(session).await?;
        if !user.is_admin() {
            return Err(BackendError::Forbidden);
        }

        let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY full_name COLLATE NOCASE")
            .fetch_all(&self.db)
            .await?;

        let images: Vec<CropImage> =
            sqlx::query_as("SELECT * FROM crop_images ORDER BY created_at DESC, rowid DESC")
                .fetch_all(&self.db)
                .await?;

        let mut by_farmer: HashMap<String, Vec<CropImage>> = HashMap::new();
        for image in images {
            by_farmer.entry(image.farmer_id.clone()).or_default().push(image);
        }

        Ok(users
            .into_iter()
            .map(|user| FarmerProfile {
                crop_images: by_farmer.remove(&user.id).unwrap_or_default(),
                phone: Some(user.phone).filter(|p| !p.is_empty()),
                full_name: user.full_name,
                id: user.id,
            })
            .collect())
    }
}
