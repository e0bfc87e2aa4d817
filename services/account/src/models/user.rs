//! User model and the payloads built from it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;

/// Audit name recorded for rows written by the service itself
pub const SYSTEM: &str = "system";

/// Language used when a user does not pick one
pub const DEFAULT_LANGUAGE: &str = "en";

/// User entity
///
/// `activation_key` is only set while `activated` is false, and `reset_key`
/// together with `reset_date` only while a password reset is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub image_url: Option<String>,
    pub activated: bool,
    pub lang_key: String,
    pub activation_key: Option<String>,
    pub reset_key: Option<String>,
    pub reset_date: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_date: DateTime<Utc>,
    pub last_modified_by: Option<String>,
    pub last_modified_date: Option<DateTime<Utc>>,
}

/// New user creation payload, inserted together with its authorities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub login: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub image_url: Option<String>,
    pub activated: bool,
    pub lang_key: String,
    pub activation_key: Option<String>,
    pub reset_key: Option<String>,
    pub reset_date: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_date: DateTime<Utc>,
    pub authorities: BTreeSet<String>,
}

impl NewUser {
    /// Minimal activated user, mostly useful to seed stores
    pub fn new(login: impl Into<String>, email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password_hash: password_hash.into(),
            first_name: None,
            last_name: None,
            email: Some(email.into()),
            image_url: None,
            activated: true,
            lang_key: DEFAULT_LANGUAGE.to_string(),
            activation_key: None,
            reset_key: None,
            reset_date: None,
            created_by: SYSTEM.to_string(),
            created_date: Utc::now(),
            authorities: BTreeSet::new(),
        }
    }
}

/// A user loaded together with its authority names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserWithAuthorities {
    #[serde(flatten)]
    pub user: User,
    pub authorities: BTreeSet<String>,
}

/// Administrative view of a user: profile, status, audit fields and roles
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminUserDto {
    pub id: Option<i64>,
    pub login: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub image_url: Option<String>,
    pub activated: bool,
    pub lang_key: Option<String>,
    pub created_by: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub last_modified_by: Option<String>,
    pub last_modified_date: Option<DateTime<Utc>>,
    pub authorities: BTreeSet<String>,
}

impl From<&UserWithAuthorities> for AdminUserDto {
    fn from(value: &UserWithAuthorities) -> Self {
        let user = &value.user;
        Self {
            id: Some(user.id),
            login: user.login.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            image_url: user.image_url.clone(),
            activated: user.activated,
            lang_key: Some(user.lang_key.clone()),
            created_by: Some(user.created_by.clone()),
            created_date: Some(user.created_date),
            last_modified_by: user.last_modified_by.clone(),
            last_modified_date: user.last_modified_date,
            authorities: value.authorities.clone(),
        }
    }
}

/// Public view of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDto {
    pub id: i64,
    pub login: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub activated: bool,
    pub lang_key: String,
    pub image_url: Option<String>,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            login: user.login.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            activated: user.activated,
            lang_key: user.lang_key.clone(),
            image_url: user.image_url.clone(),
        }
    }
}

/// Registration payload: the profile plus the clear-text password
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedUserVm {
    #[serde(flatten)]
    pub user: AdminUserDto,
    #[serde(default)]
    pub password: String,
}

/// Password reset completion payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyAndPassword {
    pub key: String,
    pub new_password: String,
}

/// Password change payload for an authenticated user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: 7,
            login: "testuser".to_string(),
            password_hash: "hash".to_string(),
            first_name: Some("Test".to_string()),
            last_name: Some("User".to_string()),
            email: Some("test@example.com".to_string()),
            image_url: None,
            activated: true,
            lang_key: "en".to_string(),
            activation_key: None,
            reset_key: Some("secret".to_string()),
            reset_date: None,
            created_by: SYSTEM.to_string(),
            created_date: Utc::now(),
            last_modified_by: None,
            last_modified_date: None,
        }
    }

    #[test]
    fn test_admin_dto_from_user() {
        let user = UserWithAuthorities {
            user: sample_user(),
            authorities: BTreeSet::from(["ROLE_USER".to_string()]),
        };

        let dto = AdminUserDto::from(&user);
        assert_eq!(dto.id, Some(7));
        assert_eq!(dto.login, "testuser");
        assert_eq!(dto.email.as_deref(), Some("test@example.com"));
        assert_eq!(dto.first_name.as_deref(), Some("Test"));
        assert!(dto.activated);
        assert_eq!(dto.lang_key.as_deref(), Some("en"));
        assert!(dto.authorities.contains("ROLE_USER"));
    }

    #[test]
    fn test_user_dto_hides_secrets() {
        let dto = UserDto::from(&sample_user());
        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["login"], "testuser");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("reset_key").is_none());
    }

    #[test]
    fn test_managed_user_vm_deserializes_flattened_profile() {
        let vm: ManagedUserVm = serde_json::from_value(serde_json::json!({
            "login": "newuser",
            "email": "newuser@example.com",
            "password": "password123"
        }))
        .unwrap();
        assert_eq!(vm.user.login, "newuser");
        assert_eq!(vm.password, "password123");
        assert!(vm.user.authorities.is_empty());
    }
}
