//! Input validation for form and API request data.
//!
//! Each validator returns the user-facing message on failure. To collect
//! several failures into one `ApiError`, use the `ValidationErrorBuilder`
//! from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Loose email shape: something@something.something, no whitespace
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();

    /// Digits with the usual phone punctuation
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9 ()\-]+$").unwrap();
}

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn validate_full_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Full name is required".to_string());
    }
    if name.chars().count() > 120 {
        return Err("Full name is too long (max 120 characters)".to_string());
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Please enter a valid email address".to_string());
    }
    Ok(())
}

/// 7 to 20 digits, optionally with a leading `+` and spaces, dashes or
/// parentheses in between.
pub fn validate_phone(phone: &str) -> Result<(), String> {
    let phone = phone.trim();
    if phone.is_empty() {
        return Err("Phone number is required".to_string());
    }
    if !PHONE_REGEX.is_match(phone) {
        return Err("Phone number may only contain digits, spaces, +, - and parentheses".to_string());
    }
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    if !(7..=20).contains(&digits) {
        return Err("Phone number must have between 7 and 20 digits".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }
    Ok(())
}

/// Latitude and longitude as submitted by a client
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), String> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err("Latitude must be between -90 and 90".to_string());
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err("Longitude must be between -180 and 180".to_string());
    }
    Ok(())
}

/// Search query for the farmer directory (optional field)
pub fn validate_search_query(query: &Option<String>) -> Result<(), String> {
    if let Some(q) = query {
        if q.len() > 100 {
            return Err("Search query is too long (max 100 characters)".to_string());
        }
    }
    Ok(())
}
