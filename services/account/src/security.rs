//! Credential hashing and random key generation

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::{Rng, distributions::Alphanumeric};

use crate::error::AccountError;

const KEY_LENGTH: usize = 20;
const GENERATED_PASSWORD_LENGTH: usize = 60;

/// One-way password encoder using Argon2 with a random salt per hash
#[derive(Clone, Default)]
pub struct PasswordEncoder {
    argon2: Argon2<'static>,
}

impl PasswordEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash a clear-text password into its PHC string form
    pub fn encode(&self, password: &str) -> Result<String, AccountError> {
        let salt = SaltString::generate(&mut rand::thread_rng());
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AccountError::Hashing(e.to_string()))?
            .to_string();
        Ok(hash)
    }

    /// Check a clear-text password against a stored hash; unparsable hashes never match
    pub fn matches(&self, password: &str, stored_hash: &str) -> bool {
        match PasswordHash::new(stored_hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn generate_activation_key() -> String {
    random_alphanumeric(KEY_LENGTH)
}

pub fn generate_reset_key() -> String {
    random_alphanumeric(KEY_LENGTH)
}

/// Throwaway password for administratively created users
pub fn generate_password() -> String {
    random_alphanumeric(GENERATED_PASSWORD_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_then_match() {
        let encoder = PasswordEncoder::new();
        let hash = encoder.encode("currentPassword").unwrap();
        assert_ne!(hash, "currentPassword");
        assert!(encoder.matches("currentPassword", &hash));
        assert!(!encoder.matches("wrongPassword", &hash));
    }

    #[test]
    fn test_same_password_gets_different_salts() {
        let encoder = PasswordEncoder::new();
        assert_ne!(encoder.encode("secret").unwrap(), encoder.encode("secret").unwrap());
    }

    #[test]
    fn test_malformed_hash_never_matches() {
        let encoder = PasswordEncoder::new();
        assert!(!encoder.matches("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_generated_keys() {
        let key = generate_activation_key();
        assert_eq!(key.len(), KEY_LENGTH);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_reset_key(), generate_reset_key());
        assert_eq!(generate_password().len(), GENERATED_PASSWORD_LENGTH);
    }
}
