use serde::Deserialize;
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::api::validation::{
    validate_email, validate_full_name, validate_password, validate_phone,
};
use crate::backend::{Backend, BackendError};
use crate::db::{AuthUser, NewAccount, Session};

pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid email or password. Please check your credentials or register if you don't have an account.";
pub const REGISTERED_NOTICE: &str = "Registration successful! Please login.";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{}", INVALID_CREDENTIALS_MESSAGE)]
    InvalidCredentials,
    #[error("An account with this email already exists")]
    EmailTaken,
    #[error("{}", first_message(.0))]
    Validation(HashMap<String, Vec<String>>),
    #[error("{0}")]
    Backend(#[from] BackendError),
}

fn first_message(errors: &HashMap<String, Vec<String>>) -> String {
    let mut fields: Vec<_> = errors.keys().collect();
    fields.sort();
    fields
        .first()
        .and_then(|f| errors[*f].first())
        .cloned()
        .unwrap_or_else(|| "Validation failed".to_string())
}

#[derive(Debug, Default)]
struct FieldErrors(HashMap<String, Vec<String>>);

impl FieldErrors {
    fn check(&mut self, field: &str, result: Result<(), String>) {
        if let Err(message) = result {
            self.0.entry(field.to_string()).or_default().push(message);
        }
    }

    fn finish(self) -> Result<(), AuthError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Validation(self.0))
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub password: String,
}

/// Where a successful login leads.
#[derive(Debug)]
pub struct LoginOutcome {
    pub session: Session,
    pub is_admin: bool,
    pub destination: &'static str,
    pub notice: &'static str,
}

/// Sign in and route by the admin predicate.
pub async fn login(backend: &dyn Backend, form: &LoginForm) -> Result<LoginOutcome, AuthError> {
    let email = form.email.trim();
    let password = form.password.trim();

    let mut errors = FieldErrors::default();
    if email.is_empty() {
        errors.check("email", Err("Email is required".to_string()));
    }
    if password.is_empty() {
        errors.check("password", Err("Password is required".to_string()));
    }
    errors.finish()?;

    let session = match backend.sign_in(email, password).await {
        Ok(session) => session,
        Err(BackendError::InvalidCredentials) => {
            warn!("Failed login attempt");
            return Err(AuthError::InvalidCredentials);
        }
        Err(e) => {
            error!(error = %e, "Sign in failed");
            return Err(e.into());
        }
    };

    let is_admin = match backend.is_admin(&session, &session.user.id).await {
        Ok(is_admin) => is_admin,
        Err(e) => {
            error!(user_id = %session.user.id, error = %e, "Error checking admin status after login");
            false
        }
    };

    info!(user_id = %session.user.id, admin = is_admin, "User logged in");

    let (destination, notice) = if is_admin {
        ("/admin", "Welcome back, Admin!")
    } else {
        ("/dashboard", "Welcome back!")
    };

    Ok(LoginOutcome {
        session,
        is_admin,
        destination,
        notice,
    })
}

/// Validate the form and create the account with its profile.
pub async fn register(backend: &dyn Backend, form: &RegisterForm) -> Result<AuthUser, AuthError> {
    let account = NewAccount {
        email: form.email.trim().to_string(),
        password: form.password.trim().to_string(),
        full_name: form.full_name.trim().to_string(),
        phone: form.phone.trim().to_string(),
    };

    let mut errors = FieldErrors::default();
    errors.check("full_name", validate_full_name(&account.full_name));
    errors.check("email", validate_email(&account.email));
    errors.check("phone", validate_phone(&account.phone));
    errors.check("password", validate_password(&account.password));
    errors.finish()?;

    match backend.sign_up(&account).await {
        Ok(user) => {
            info!(user_id = %user.id, "Farmer registered");
            Ok(user)
        }
        Err(BackendError::EmailTaken) => Err(AuthError::EmailTaken),
        Err(e) => {
            error!(error = %e, "Registration failed");
            Err(e.into())
        }
    }
}

/// Revoke the session behind `token`.
pub async fn logout(backend: &dyn Backend, token: &str) -> Result<(), AuthError> {
    backend.sign_out(token).await.map_err(|e| {
        error!(error = %e, "Sign out failed");
        AuthError::from(e)
    })
}
