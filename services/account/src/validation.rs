//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

use crate::models::AdminUserDto;

pub const LOGIN_MAX_LENGTH: usize = 50;
pub const PASSWORD_MIN_LENGTH: usize = 4;
pub const PASSWORD_MAX_LENGTH: usize = 100;

/// Validate login
pub fn validate_login(login: &str) -> Result<(), String> {
    if login.is_empty() {
        return Err("Login is required".to_string());
    }

    if login.chars().count() > LOGIN_MAX_LENGTH {
        return Err(format!(
            "Login must be at most {} characters long",
            LOGIN_MAX_LENGTH
        ));
    }

    static LOGIN_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = LOGIN_REGEX
        .get_or_init(|| Regex::new(r"^[_.@A-Za-z0-9-]+$").expect("Failed to compile login regex"));

    if !regex.is_match(login) {
        return Err(
            "Login can only contain letters, digits and the characters _ . @ -".to_string(),
        );
    }

    Ok(())
}

/// Validate email
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() < 5 {
        return Err("Email must be at least 5 characters long".to_string());
    }

    if email.len() > 254 {
        return Err("Email must be at most 254 characters long".to_string());
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+$").expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate a clear-text password before it is hashed
pub fn is_password_length_invalid(password: &str) -> bool {
    let len = password.chars().count();
    !(PASSWORD_MIN_LENGTH..=PASSWORD_MAX_LENGTH).contains(&len)
}

fn validate_optional_length(field: &str, value: Option<&str>, max: usize) -> Result<(), String> {
    match value {
        Some(v) if v.chars().count() > max => Err(format!(
            "{} must be at most {} characters long",
            field, max
        )),
        _ => Ok(()),
    }
}

impl AdminUserDto {
    /// Check every field constraint of the administrative user payload
    pub fn validate(&self) -> Result<(), String> {
        validate_login(&self.login)?;
        match self.email.as_deref() {
            Some(email) => validate_email(email)?,
            None => return Err("Email is required".to_string()),
        }
        validate_optional_length("First name", self.first_name.as_deref(), 50)?;
        validate_optional_length("Last name", self.last_name.as_deref(), 50)?;
        validate_optional_length("Image URL", self.image_url.as_deref(), 256)?;

        if let Some(lang_key) = self.lang_key.as_deref() {
            let len = lang_key.chars().count();
            if !(2..=10).contains(&len) {
                return Err("Language key must be between 2 and 10 characters long".to_string());
            }
        }

        Ok(())
    }
}
