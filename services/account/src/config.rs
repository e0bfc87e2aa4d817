//! Account service configuration

use anyhow::Result;
use chrono::{Duration, Utc};

/// Account service configuration
#[derive(Debug, Clone)]
pub struct AccountConfig {
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// How long a password reset key stays usable, in hours
    pub reset_key_validity_hours: i64,
    /// Age after which an unactivated registration is purged, in days
    pub stale_registration_days: i64,
    /// Cron expression (with seconds) for the stale registration purge
    pub cleanup_cron: String,
    /// Sender address of outgoing mail
    pub mail_from: String,
    /// Public base URL used to build links in outgoing mail
    pub mail_base_url: String,
    /// TTL of cached user entries, in seconds
    pub user_cache_ttl_seconds: u64,
    /// Bearer token required on `/api/admin/*`; `None` leaves those routes open
    pub admin_token: Option<String>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            reset_key_validity_hours: 24,
            stale_registration_days: 3,
            cleanup_cron: "0 0 1 * * *".to_string(),
            mail_from: "bank@localhost".to_string(),
            mail_base_url: "http://127.0.0.1:8080".to_string(),
            user_cache_ttl_seconds: 3600,
            admin_token: None,
        }
    }
}

impl AccountConfig {
    /// Create a new AccountConfig from environment variables
    ///
    /// # Environment Variables
    /// - `BIND_ADDRESS`: HTTP listen address (default: 0.0.0.0:8080)
    /// - `RESET_KEY_VALIDITY_HOURS`: Reset key lifetime (default: 24)
    /// - `STALE_REGISTRATION_DAYS`: Unactivated account lifetime (default: 3)
    /// - `CLEANUP_CRON`: Purge schedule (default: "0 0 1 * * *")
    /// - `MAIL_FROM`: Sender address (default: bank@localhost)
    /// - `MAIL_BASE_URL`: Base URL for mail links (default: http://127.0.0.1:8080)
    /// - `USER_CACHE_TTL_SECONDS`: Cached user TTL (default: 3600)
    /// - `ADMIN_API_TOKEN`: Bearer token for the admin routes (default: unset)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let reset_key_validity_hours = parse_var("RESET_KEY_VALIDITY_HOURS")?
            .unwrap_or(defaults.reset_key_validity_hours);
        if reset_key_validity_hours <= 0 {
            anyhow::bail!("RESET_KEY_VALIDITY_HOURS must be positive");
        }
        check_window("RESET_KEY_VALIDITY_HOURS", Duration::try_hours(reset_key_validity_hours))?;

        let stale_registration_days =
            parse_var("STALE_REGISTRATION_DAYS")?.unwrap_or(defaults.stale_registration_days);
        if stale_registration_days <= 0 {
            anyhow::bail!("STALE_REGISTRATION_DAYS must be positive");
        }
        check_window("STALE_REGISTRATION_DAYS", Duration::try_days(stale_registration_days))?;

        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            reset_key_validity_hours,
            stale_registration_days,
            cleanup_cron: std::env::var("CLEANUP_CRON").unwrap_or(defaults.cleanup_cron),
            mail_from: std::env::var("MAIL_FROM").unwrap_or(defaults.mail_from),
            mail_base_url: std::env::var("MAIL_BASE_URL").unwrap_or(defaults.mail_base_url),
            user_cache_ttl_seconds: parse_var("USER_CACHE_TTL_SECONDS")?
                .unwrap_or(defaults.user_cache_ttl_seconds),
            admin_token: std::env::var("ADMIN_API_TOKEN")
                .ok()
                .filter(|token| !token.is_empty()),
        })
    }

    /// Saturates at `Duration::MAX` for values `from_env` would have rejected
    pub fn reset_key_validity(&self) -> Duration {
        Duration::try_hours(self.reset_key_validity_hours).unwrap_or(Duration::MAX)
    }

    pub fn stale_registration_age(&self) -> Duration {
        Duration::try_days(self.stale_registration_days).unwrap_or(Duration::MAX)
    }
}

/// A window must fit in a `Duration` and still leave a representable
/// instant when subtracted from now
fn check_window(name: &str, window: Option<Duration>) -> Result<()> {
    match window.and_then(|window| Utc::now().checked_sub_signed(window)) {
        Some(_) => Ok(()),
        None => anyhow::bail!("{} is out of range", name),
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 8] = [
        "BIND_ADDRESS",
        "RESET_KEY_VALIDITY_HOURS",
        "STALE_REGISTRATION_DAYS",
        "CLEANUP_CRON",
        "MAIL_FROM",
        "MAIL_BASE_URL",
        "USER_CACHE_TTL_SECONDS",
        "ADMIN_API_TOKEN",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_account_config_defaults() {
        clear_env();

        let config = AccountConfig::from_env().unwrap();
        assert_eq!(config.reset_key_validity(), Duration::hours(24));
        assert_eq!(config.stale_registration_age(), Duration::days(3));
        assert_eq!(config.cleanup_cron, "0 0 1 * * *");
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert!(config.admin_token.is_none());
    }

    #[test]
    #[serial]
    fn test_account_config_with_custom_values() {
        clear_env();
        unsafe {
            std::env::set_var("RESET_KEY_VALIDITY_HOURS", "2");
            std::env::set_var("MAIL_FROM", "noreply@bank.test");
            std::env::set_var("ADMIN_API_TOKEN", "s3cret");
        }

        let config = AccountConfig::from_env().unwrap();
        assert_eq!(config.reset_key_validity_hours, 2);
        assert_eq!(config.mail_from, "noreply@bank.test");
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_account_config_rejects_bad_numbers() {
        clear_env();
        unsafe {
            std::env::set_var("STALE_REGISTRATION_DAYS", "soon");
        }
        assert!(AccountConfig::from_env().is_err());

        unsafe {
            std::env::set_var("STALE_REGISTRATION_DAYS", "0");
        }
        assert!(AccountConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_account_config_rejects_out_of_range_windows() {
        clear_env();
        unsafe {
            std::env::set_var("RESET_KEY_VALIDITY_HOURS", "999999999999999");
        }
        assert!(AccountConfig::from_env().is_err());

        clear_env();
        unsafe {
            std::env::set_var("STALE_REGISTRATION_DAYS", "999999999999999");
        }
        assert!(AccountConfig::from_env().is_err());

        clear_env();
        unsafe {
            // about 100 years still fits
            std::env::set_var("STALE_REGISTRATION_DAYS", "36500");
        }
        let config = AccountConfig::from_env().unwrap();
        assert_eq!(config.stale_registration_age(), Duration::days(36500));

        clear_env();
    }

    #[test]
    fn test_oversized_windows_saturate() {
        let config = AccountConfig {
            reset_key_validity_hours: i64::MAX,
            stale_registration_days: i64::MAX,
            ..AccountConfig::default()
        };
        assert_eq!(config.reset_key_validity(), Duration::MAX);
        assert_eq!(config.stale_registration_age(), Duration::MAX);
    }
}
