//! Client for a hosted Supabase project (auth, RPC, storage and PostgREST).

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Backend, BackendError, BackendResult};
use crate::config::BackendConfig;
use crate::db::{AuthUser, CropImage, FarmerProfile, NewAccount, NewCropImage, Session};

const PROFILE_SELECT: &str =
    "id,full_name,phone,crop_images(id,farmer_id,image_url,latitude,longitude,created_at)";

pub struct SupabaseBackend {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: RemoteUser,
}

#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<RemoteUser> for AuthUser {
    fn from(user: RemoteUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
        }
    }
}

/// Error bodies differ between the auth, storage and PostgREST services.
#[derive(Debug, Default, Deserialize)]
struct RemoteErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
    error_code: Option<String>,
}

impl RemoteErrorBody {
    fn text(&self) -> Option<String> {
        self.msg
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.error_description.clone())
            .or_else(|| self.error.clone())
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: i64,
}

/// Expiry carried in the token's `exp` claim, if it is a readable JWT.
fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: JwtClaims = serde_json::from_slice(&decoded).ok()?;
    DateTime::from_timestamp(claims.exp, 0)
}

async fn remote_error(response: Response) -> BackendError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed: RemoteErrorBody = serde_json::from_str(&body).unwrap_or_default();

    let is_invalid_credentials = parsed.error_code.as_deref() == Some("invalid_credentials")
        || parsed.error.as_deref() == Some("invalid_grant")
        || parsed.text().as_deref() == Some("Invalid login credentials");
    if is_invalid_credentials {
        return BackendError::InvalidCredentials;
    }

    let already_registered = parsed.error_code.as_deref() == Some("user_already_exists")
        || parsed
            .text()
            .map_or(false, |t| t.contains("already registered"));
    if already_registered {
        return BackendError::EmailTaken;
    }

    let message = parsed.text().unwrap_or_else(|| {
        if body.is_empty() {
            status.to_string()
        } else {
            body
        }
    });
    BackendError::Remote {
        status: status.as_u16(),
        message,
    }
}

async fn checked(response: Response) -> BackendResult<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(remote_error(response).await)
    }
}

impl SupabaseBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = config
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .context("backend.url is required for the supabase backend")?
            .trim_end_matches('/')
            .to_string();
        let anon_key = config
            .anon_key
            .clone()
            .filter(|k| !k.is_empty())
            .context("backend.anon_key is required for the supabase backend")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            anon_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn anon(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    fn authed(&self, request: RequestBuilder, session: &Session) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
    }

    fn object_endpoint(&self, bucket: &str, name: &str) -> String {
        self.endpoint(&format!("/storage/v1/object/{}/{}", bucket, name))
    }
}

#[async_trait]
impl Backend for SupabaseBackend {
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let response = self
            .anon(self.client.post(self.endpoint("/auth/v1/token")))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        let token: TokenResponse = checked(response).await?.json().await?;
        let expires_at = jwt_expiry(&token.access_token).unwrap_or_else(|| {
            Utc::now() + chrono::Duration::seconds(token.expires_in.unwrap_or(3600))
        });

        Ok(Session {
            access_token: token.access_token,
            user: token.user.into(),
            expires_at,
        })
    }

    async fn sign_up(&self, account: &NewAccount) -> BackendResult<AuthUser> {
        let response = self
            .anon(self.client.post(self.endpoint("/auth/v1/signup")))
            .json(&json!({
                "email": account.email,
                "password": account.password,
                "data": {
                    "name": account.full_name,
                    "full_name": account.full_name,
                    "phone": account.phone,
                }
            }))
            .send()
            .await?;

        // With email confirmation on, the user comes back at the top level;
        // without it, wrapped in a session response.
        let body: serde_json::Value = checked(response).await?.json().await?;
        let user = body.get("user").filter(|u| u.is_object()).unwrap_or(&body);
        let user: RemoteUser = serde_json::from_value(user.clone())
            .map_err(|e| BackendError::Internal(format!("Unexpected sign-up response: {}", e)))?;
        Ok(user.into())
    }

    async fn get_session(&self, access_token: &str) -> BackendResult<Option<Session>> {
        let response = self
            .client
            .get(self.endpoint("/auth/v1/user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Ok(None);
        }

        let user: RemoteUser = checked(response).await?.json().await?;
        let expires_at =
            jwt_expiry(access_token).unwrap_or_else(|| Utc::now() + chrono::Duration::hours(1));
        if expires_at <= Utc::now() {
            return Ok(None);
        }

        Ok(Some(Session {
            access_token: access_token.to_string(),
            user: user.into(),
            expires_at,
        }))
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        let response = self
            .client
            .post(self.endpoint("/auth/v1/logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                debug!("Sign-out of an unknown session ignored");
                Ok(())
            }
            _ => Err(remote_error(response).await),
        }
    }

    async fn is_admin(&self, session: &Session, user_id: &str) -> BackendResult<bool> {
        let response = self
            .authed(self.client.post(self.endpoint("/rest/v1/rpc/is_admin")), session)
            .json(&json!({ "user_id": user_id }))
            .send()
            .await?;

        Ok(checked(response).await?.json::<Option<bool>>().await?.unwrap_or(false))
    }

    async fn upload_object(
        &self,
        session: &Session,
        bucket: &str,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> BackendResult<()> {
        let response = self
            .authed(self.client.post(self.object_endpoint(bucket, name)), session)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(data)
            .send()
            .await?;

        checked(response).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        self.endpoint(&format!("/storage/v1/object/public/{}/{}", bucket, name))
    }

    async fn remove_object(
        &self,
        session: &Session,
        bucket: &str,
        name: &str,
    ) -> BackendResult<()> {
        let response = self
            .authed(self.client.delete(self.object_endpoint(bucket, name)), session)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(format!("Object {}/{}", bucket, name)));
        }
        checked(response).await?;
        Ok(())
    }

    async fn insert_crop_image(
        &self,
        session: &Session,
        record: &NewCropImage,
    ) -> BackendResult<CropImage> {
        let response = self
            .authed(self.client.post(self.endpoint("/rest/v1/crop_images")), session)
            .header("Prefer", "return=representation")
            .json(record)
            .send()
            .await?;

        let mut rows: Vec<CropImage> = checked(response).await?.json().await?;
        if rows.is_empty() {
            warn!("Insert returned no representation");
            return Err(BackendError::Internal("Insert returned no row".to_string()));
        }
        Ok(rows.swap_remove(0))
    }

    async fn recent_crop_images(
        &self,
        session: &Session,
        farmer_id: &str,
        limit: u32,
    ) -> BackendResult<Vec<CropImage>> {
        let response = self
            .authed(self.client.get(self.endpoint("/rest/v1/crop_images")), session)
            .query(&[
                ("select", "*".to_string()),
                ("farmer_id", format!("eq.{}", farmer_id)),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        Ok(checked(response).await?.json().await?)
    }

    async fn farmers_with_images(&self, session: &Session) -> BackendResult<Vec<FarmerProfile>> {
        let response = self
            .authed(self.client.get(self.endpoint("/rest/v1/profiles")), session)
            .query(&[("select", PROFILE_SELECT), ("order", "full_name.asc")])
            .send()
            .await?;

        let mut farmers: Vec<FarmerProfile> = checked(response).await?.json().await?;
        for farmer in &mut farmers {
            farmer
                .crop_images
                .sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        Ok(farmers)
    }
}
