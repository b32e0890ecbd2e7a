// Server-rendered pages
// Uses Askama templates; flash notices travel in a short-lived cookie

mod templates;

use askama::Template;
use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::farmers::FarmerQuery;
use crate::api::uploads::{process_submission, read_submission};
use crate::auth::{self, gate, Access, AuthError, GateDecision, LoginForm, RegisterForm, REGISTERED_NOTICE};
use crate::db::Session;
use crate::listing;
use crate::AppState;

pub use templates::*;

// Session token cookie name
pub const SESSION_COOKIE: &str = "farmconnect_session";

// One-shot notice shown on the next rendered page
pub const FLASH_COOKIE: &str = "farmconnect_flash";

pub const UPLOADED_NOTICE: &str = "Crop image uploaded successfully!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Error,
            message: message.into(),
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self.kind {
            FlashKind::Success => "flash flash-success",
            FlashKind::Error => "flash flash-error",
        }
    }

    fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(self).unwrap_or_default())
    }

    fn decode(value: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(value).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

fn set_flash(jar: CookieJar, flash: Flash) -> CookieJar {
    jar.add(
        Cookie::build((FLASH_COOKIE, flash.encode()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build(),
    )
}

// Read and clear the pending notice
fn take_flash(jar: CookieJar) -> (CookieJar, Option<Flash>) {
    let Some(cookie) = jar.get(FLASH_COOKIE) else {
        return (jar, None);
    };
    let flash = Flash::decode(cookie.value());
    let jar = jar.remove(Cookie::build((FLASH_COOKIE, "")).path("/").build());
    (jar, flash)
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(state.config.auth.secure_cookies)
        .same_site(SameSite::Lax)
        .build()
}

fn clear_session(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build())
}

// Get token from cookie
fn get_token(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE).map(|c| c.value().to_string())
}

fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// Helper to render templates and handle errors
fn render_template<T: Template>(template: T) -> Response {
    render_with_status(StatusCode::OK, template)
}

fn render_with_status<T: Template>(status: StatusCode, template: T) -> Response {
    match template.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("Template error: {}", e)).into_response(),
    }
}

// Redirect after a POST, carrying a notice
fn redirect_with(jar: CookieJar, to: &str, flash: Flash) -> Response {
    (set_flash(jar, flash), Redirect::to(to)).into_response()
}

/// Run the gate for a page; `Err` carries the redirect response.
async fn require(state: &AppState, jar: CookieJar, access: Access) -> Result<(CookieJar, Session), Response> {
    let token = get_token(&jar);
    match gate(state.backend.as_ref(), token.as_deref(), access).await {
        GateDecision::Allow(session) => Ok((jar, session)),
        GateDecision::Redirect { to, notice } => Err(redirect_with(jar, to, Flash::error(notice))),
    }
}

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(|| async { Redirect::to("/login") }))
        .route("/login", get(login_page).post(login_submit))
        .route("/register", get(register_page).post(register_submit))
        .route("/dashboard", get(dashboard))
        .route("/admin", get(admin))
}

/// Logout form target; mounted with the general limit so signing out never
/// spends the login budget.
pub fn session_router() -> Router<Arc<AppState>> {
    Router::new().route("/logout", post(logout))
}

/// Upload form target; mounted separately so it gets the upload rate limit.
pub fn upload_router() -> Router<Arc<AppState>> {
    Router::new().route("/dashboard/upload", post(upload_submit))
}

// Login page
async fn login_page(jar: CookieJar) -> Response {
    let (jar, flash) = take_flash(jar);
    let template = LoginTemplate {
        flash,
        email: String::new(),
        version: version(),
    };
    (jar, render_template(template)).into_response()
}

// Login submit
async fn login_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    match auth::login(state.backend.as_ref(), &form).await {
        Ok(outcome) => {
            let jar = jar.add(session_cookie(&state, outcome.session.access_token));
            redirect_with(jar, outcome.destination, Flash::success(outcome.notice))
        }
        Err(e) => {
            let status = match &e {
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::Validation(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::BAD_GATEWAY,
            };
            let template = LoginTemplate {
                flash: Some(Flash::error(e.to_string())),
                email: form.email.trim().to_string(),
                version: version(),
            };
            render_with_status(status, template)
        }
    }
}

// Registration page
async fn register_page(jar: CookieJar) -> Response {
    let (jar, flash) = take_flash(jar);
    let template = RegisterTemplate {
        flash,
        values: RegisterValues::default(),
        errors: Vec::new(),
        version: version(),
    };
    (jar, render_template(template)).into_response()
}

// Registration submit
async fn register_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<RegisterForm>,
) -> Response {
    match auth::register(state.backend.as_ref(), &form).await {
        Ok(_) => redirect_with(jar, "/login", Flash::success(REGISTERED_NOTICE)),
        Err(e) => {
            let (status, errors) = match &e {
                AuthError::Validation(fields) => {
                    let mut fields: Vec<_> = fields.iter().collect();
                    fields.sort_by(|a, b| a.0.cmp(b.0));
                    let errors = fields.into_iter().flat_map(|(_, m)| m.clone()).collect();
                    (StatusCode::BAD_REQUEST, errors)
                }
                AuthError::EmailTaken => (StatusCode::CONFLICT, Vec::new()),
                _ => (StatusCode::BAD_GATEWAY, Vec::new()),
            };
            let template = RegisterTemplate {
                flash: Some(Flash::error(e.to_string())),
                values: RegisterValues {
                    full_name: form.full_name.trim().to_string(),
                    email: form.email.trim().to_string(),
                    phone: form.phone.trim().to_string(),
                },
                errors,
                version: version(),
            };
            render_with_status(status, template)
        }
    }
}

// Logout
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(token) = get_token(&jar) {
        if let Err(e) = auth::logout(state.backend.as_ref(), &token).await {
            warn!(error = %e, "Logout did not reach the backend");
        }
    }
    redirect_with(clear_session(jar), "/login", Flash::success("You have been logged out"))
}

// Farmer dashboard
async fn dashboard(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let (jar, session) = match require(&state, jar, Access::Farmer).await {
        Ok(allowed) => allowed,
        Err(redirect) => return redirect,
    };
    let (jar, flash) = take_flash(jar);

    let (uploads, uploads_error) = match listing::recent_uploads(
        state.backend.as_ref(),
        &session,
        state.config.listing.recent_limit,
    )
    .await
    {
        Ok(uploads) => (uploads, None),
        Err(_) => (Vec::new(), Some("Failed to load recent uploads".to_string())),
    };

    let template = DashboardTemplate {
        flash,
        email: session.user.email.clone().unwrap_or_default(),
        uploads,
        uploads_error,
        device: DeviceSettings::from_config(&state.config),
        version: version(),
    };
    (jar, render_template(template)).into_response()
}

// Upload form submit
async fn upload_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    multipart: Multipart,
) -> Response {
    let (jar, session) = match require(&state, jar, Access::Farmer).await {
        Ok(allowed) => allowed,
        Err(redirect) => return redirect,
    };

    let result = match read_submission(multipart).await {
        Ok(submission) => process_submission(&state, &session.access_token, submission).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(record) => {
            debug!(record = %record.id, "Upload stored from dashboard");
            redirect_with(jar, "/dashboard", Flash::success(UPLOADED_NOTICE))
        }
        Err(e) => redirect_with(jar, "/dashboard", Flash::error(e.message())),
    }
}

// Admin farmer directory
async fn admin(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<FarmerQuery>,
) -> Response {
    let (jar, session) = match require(&state, jar, Access::Admin).await {
        Ok(allowed) => allowed,
        Err(redirect) => return redirect,
    };
    let (jar, flash) = take_flash(jar);

    let template = match listing::farmer_directory(state.backend.as_ref(), &session, query.q.as_deref()).await {
        Ok(directory) => AdminTemplate {
            flash,
            empty_message: directory.empty_message(),
            query: directory.query,
            total: directory.total,
            farmers: directory.farmers,
            load_error: None,
            version: version(),
        },
        Err(e) => AdminTemplate {
            flash,
            query: query.q.unwrap_or_default(),
            total: 0,
            farmers: Vec::new(),
            load_error: Some(format!("Error loading farmer data: {}", e)),
            empty_message: None,
            version: version(),
        },
    };
    (jar, render_template(template)).into_response()
}
