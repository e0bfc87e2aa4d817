//! Account lifecycle: registration, activation, password reset and user administration
//!
//! Missing users are reported as `Ok(None)`; only uniqueness conflicts, bad
//! input and storage failures are errors. Every mutation evicts the cached
//! entries of the user before and after the write.

use chrono::{DateTime, Utc};
use common::error::DatabaseError;
use common::pagination::{Page, PageRequest};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::UserCache;
use crate::config::AccountConfig;
use crate::error::AccountError;
use crate::models::user::{DEFAULT_LANGUAGE, SYSTEM};
use crate::models::{
    AdminUserDto, Authority, AuthorityRecord, NewUser, User, UserDto, UserWithAuthorities,
};
use crate::repositories::{EMAIL_CONSTRAINT, LOGIN_CONSTRAINT, UserStore};
use crate::security::{
    PasswordEncoder, generate_activation_key, generate_password, generate_reset_key,
};
use crate::validation::validate_email;

/// Batch size used when purging stale registrations
const PURGE_BATCH_SIZE: u32 = 100;

/// Turn a late unique violation into the matching account error
fn uniqueness_error(err: DatabaseError) -> AccountError {
    if err.violates(LOGIN_CONSTRAINT) {
        AccountError::LoginAlreadyUsed
    } else if err.violates(EMAIL_CONSTRAINT) {
        AccountError::EmailAlreadyUsed
    } else {
        AccountError::Database(err)
    }
}

fn normalize_email(email: Option<&str>) -> Option<String> {
    email.map(str::to_lowercase)
}

#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserStore>,
    cache: Arc<dyn UserCache>,
    password_encoder: PasswordEncoder,
    config: AccountConfig,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserStore>,
        cache: Arc<dyn UserCache>,
        password_encoder: PasswordEncoder,
        config: AccountConfig,
    ) -> Self {
        Self {
            users,
            cache,
            password_encoder,
            config,
        }
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    /// Write a user and evict its cache entries on both sides of the write
    async fn save(&self, user: &User) -> Result<User, AccountError> {
        self.cache.evict(user).await;
        let saved = self.users.update(user).await.map_err(uniqueness_error)?;
        self.cache.evict(&saved).await;
        Ok(saved)
    }

    async fn remove(&self, user: &User) -> Result<(), AccountError> {
        self.users.delete(user.id).await?;
        self.cache.evict(user).await;
        Ok(())
    }

    /// Activate the non-activated user holding `key` and clear the key
    pub async fn activate_registration(&self, key: &str) -> Result<Option<User>, AccountError> {
        debug!("Activating user for activation key {}", key);
        let Some(mut user) = self.users.find_one_by_activation_key(key).await? else {
            return Ok(None);
        };
        if user.activated {
            return Ok(None);
        }

        user.activated = true;
        user.activation_key = None;
        user.last_modified_by = Some(SYSTEM.to_string());
        user.last_modified_date = Some(Utc::now());

        let user = self.save(&user).await?;
        info!("Activated user: {}", user.login);
        Ok(Some(user))
    }

    /// Set a new password for the user holding `key`, provided the key is still valid
    pub async fn complete_password_reset(
        &self,
        new_password: &str,
        key: &str,
    ) -> Result<Option<User>, AccountError> {
        debug!("Reset user password for reset key {}", key);
        let Some(mut user) = self.users.find_one_by_reset_key(key).await? else {
            return Ok(None);
        };

        let window_start = Utc::now()
            .checked_sub_signed(self.config.reset_key_validity())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match user.reset_date {
            Some(reset_date) if reset_date >= window_start => {}
            _ => {
                debug!("Reset key for user {} has expired", user.login);
                return Ok(None);
            }
        }

        user.password_hash = self.password_encoder.encode(new_password)?;
        user.reset_key = None;
        user.reset_date = None;
        user.last_modified_by = Some(user.login.clone());
        user.last_modified_date = Some(Utc::now());

        self.save(&user).await.map(Some)
    }

    /// Open a password reset window for the activated user owning `email`
    pub async fn request_password_reset(&self, email: &str) -> Result<Option<User>, AccountError> {
        let Some(mut user) = self.users.find_one_by_email_ignore_case(email).await? else {
            return Ok(None);
        };
        if !user.activated {
            debug!("Ignoring password reset for non-activated user {}", user.login);
            return Ok(None);
        }

        let now = Utc::now();
        user.reset_key = Some(generate_reset_key());
        user.reset_date = Some(now);
        user.last_modified_by = Some(SYSTEM.to_string());
        user.last_modified_date = Some(now);

        self.save(&user).await.map(Some)
    }

    /// Register a new, non-activated user with the default role
    ///
    /// An abandoned registration holding the same login or email is deleted
    /// in the same store call that inserts the new user; an activated one
    /// makes the registration fail and leaves every record in place.
    pub async fn register_user(
        &self,
        user_dto: &AdminUserDto,
        password: &str,
    ) -> Result<User, AccountError> {
        user_dto.validate().map_err(AccountError::Validation)?;

        let mut stale = Vec::new();
        if let Some(existing) = self.users.find_one_by_login(&user_dto.login).await? {
            if existing.activated {
                return Err(AccountError::LoginAlreadyUsed);
            }
            stale.push(existing);
        }
        if let Some(email) = user_dto.email.as_deref() {
            if let Some(existing) = self.users.find_one_by_email_ignore_case(email).await? {
                if existing.activated {
                    return Err(AccountError::EmailAlreadyUsed);
                }
                if stale.iter().all(|user| user.id != existing.id) {
                    stale.push(existing);
                }
            }
        }

        let new_user = NewUser {
            login: user_dto.login.clone(),
            password_hash: self.password_encoder.encode(password)?,
            first_name: user_dto.first_name.clone(),
            last_name: user_dto.last_name.clone(),
            email: normalize_email(user_dto.email.as_deref()),
            image_url: user_dto.image_url.clone(),
            activated: false,
            lang_key: user_dto
                .lang_key
                .clone()
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            activation_key: Some(generate_activation_key()),
            reset_key: None,
            reset_date: None,
            created_by: SYSTEM.to_string(),
            created_date: Utc::now(),
            authorities: BTreeSet::from([Authority::User.as_str().to_string()]),
        };

        for user in &stale {
            debug!("Replacing abandoned registration {}", user.login);
        }
        let stale_ids: Vec<i64> = stale.iter().map(|user| user.id).collect();
        let created = self
            .users
            .replace_registrations(&stale_ids, &new_user)
            .await
            .map_err(uniqueness_error)?;
        for user in &stale {
            self.cache.evict(user).await;
        }
        self.cache.evict(&created.user).await;
        debug!("Created Information for User: {}", created.user.login);
        Ok(created.user)
    }

    /// Create a user on behalf of an administrator
    ///
    /// The user gets a random password and an open reset window so they can
    /// choose their own password from the creation mail.
    pub async fn create_user(&self, user_dto: &AdminUserDto) -> Result<User, AccountError> {
        user_dto.validate().map_err(AccountError::Validation)?;
        let authorities = Authority::parse_all(&user_dto.authorities)?;

        if self.users.find_one_by_login(&user_dto.login).await?.is_some() {
            return Err(AccountError::LoginAlreadyUsed);
        }
        if let Some(email) = user_dto.email.as_deref() {
            if self.users.find_one_by_email_ignore_case(email).await?.is_some() {
                return Err(AccountError::EmailAlreadyUsed);
            }
        }

        let now = Utc::now();
        let new_user = NewUser {
            login: user_dto.login.clone(),
            password_hash: self.password_encoder.encode(&generate_password())?,
            first_name: user_dto.first_name.clone(),
            last_name: user_dto.last_name.clone(),
            email: normalize_email(user_dto.email.as_deref()),
            image_url: user_dto.image_url.clone(),
            activated: user_dto.activated,
            lang_key: user_dto
                .lang_key
                .clone()
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            activation_key: (!user_dto.activated).then(generate_activation_key),
            reset_key: Some(generate_reset_key()),
            reset_date: Some(now),
            created_by: SYSTEM.to_string(),
            created_date: now,
            authorities: Authority::names(&authorities),
        };

        let created = self
            .users
            .insert(&new_user)
            .await
            .map_err(uniqueness_error)?;
        self.cache.evict(&created.user).await;
        debug!("Created Information for User: {}", created.user.login);
        Ok(created.user)
    }

    /// Overwrite every administrable field of an existing user
    pub async fn update_user(
        &self,
        user_dto: &AdminUserDto,
    ) -> Result<Option<UserWithAuthorities>, AccountError> {
        user_dto.validate().map_err(AccountError::Validation)?;
        let Some(id) = user_dto.id else {
            return Ok(None);
        };
        let Some(mut user) = self.users.find_by_id(id).await? else {
            return Ok(None);
        };
        let authorities = Authority::names(&Authority::parse_all(&user_dto.authorities)?);

        if let Some(other) = self.users.find_one_by_login(&user_dto.login).await? {
            if other.id != id {
                return Err(AccountError::LoginAlreadyUsed);
            }
        }
        if let Some(email) = user_dto.email.as_deref() {
            if let Some(other) = self.users.find_one_by_email_ignore_case(email).await? {
                if other.id != id {
                    return Err(AccountError::EmailAlreadyUsed);
                }
            }
        }

        // entries under the old login and email must go too
        self.cache.evict(&user).await;

        user.login = user_dto.login.clone();
        user.first_name = user_dto.first_name.clone();
        user.last_name = user_dto.last_name.clone();
        user.email = normalize_email(user_dto.email.as_deref());
        user.image_url = user_dto.image_url.clone();
        user.activated = user_dto.activated;
        if user.activated {
            user.activation_key = None;
        }
        if let Some(lang_key) = &user_dto.lang_key {
            user.lang_key = lang_key.clone();
        }
        user.last_modified_by = Some(SYSTEM.to_string());
        user.last_modified_date = Some(Utc::now());

        let updated = self
            .users
            .update_with_authorities(&user, &authorities)
            .await
            .map_err(uniqueness_error)?;
        self.cache.evict(&updated.user).await;
        debug!("Changed Information for User: {}", updated.user.login);

        Ok(Some(updated))
    }

    /// Update the profile fields a user manages themselves
    ///
    /// `None` for `email`, `lang_key` or `image_url` keeps the stored value.
    pub async fn update_basic_info(
        &self,
        login: &str,
        first_name: Option<String>,
        last_name: Option<String>,
        email: Option<String>,
        lang_key: Option<String>,
        image_url: Option<String>,
    ) -> Result<Option<User>, AccountError> {
        let Some(mut user) = self.users.find_one_by_login(login).await? else {
            return Ok(None);
        };

        if let Some(email) = email.as_deref() {
            validate_email(email).map_err(AccountError::Validation)?;
            if let Some(other) = self.users.find_one_by_email_ignore_case(email).await? {
                if other.id != user.id {
                    return Err(AccountError::EmailAlreadyUsed);
                }
            }
        }

        self.cache.evict(&user).await;

        user.first_name = first_name;
        user.last_name = last_name;
        if let Some(email) = email {
            user.email = Some(email.to_lowercase());
        }
        if let Some(lang_key) = lang_key {
            user.lang_key = lang_key;
        }
        if let Some(image_url) = image_url {
            user.image_url = Some(image_url);
        }
        user.last_modified_by = Some(user.login.clone());
        user.last_modified_date = Some(Utc::now());

        let user = self.save(&user).await?;
        debug!("Changed Information for User: {}", user.login);
        Ok(Some(user))
    }

    pub async fn change_password(
        &self,
        login: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AccountError> {
        let Some(mut user) = self.users.find_one_by_login(login).await? else {
            return Ok(());
        };
        if !self
            .password_encoder
            .matches(current_password, &user.password_hash)
        {
            return Err(AccountError::InvalidCurrentPassword);
        }

        user.password_hash = self.password_encoder.encode(new_password)?;
        user.last_modified_by = Some(user.login.clone());
        user.last_modified_date = Some(Utc::now());

        self.save(&user).await?;
        debug!("Changed password for User: {}", login);
        Ok(())
    }

    /// Delete the user with this login; unknown logins are ignored
    pub async fn delete_user(&self, login: &str) -> Result<(), AccountError> {
        if let Some(user) = self.users.find_one_by_login(login).await? {
            self.remove(&user).await?;
            debug!("Deleted User: {}", login);
        }
        Ok(())
    }

    pub async fn get_all_managed_users(
        &self,
        page: &PageRequest,
    ) -> Result<Page<AdminUserDto>, AccountError> {
        let users = self.users.find_all(page).await?;
        Ok(users.map(|user| AdminUserDto::from(&user)))
    }

    /// Activated users only
    pub async fn get_all_public_users(
        &self,
        page: &PageRequest,
    ) -> Result<Page<UserDto>, AccountError> {
        let users = self.users.find_all_activated(page).await?;
        Ok(users.map(|user| UserDto::from(&user)))
    }

    pub async fn get_user_with_authorities_by_login(
        &self,
        login: &str,
    ) -> Result<Option<UserWithAuthorities>, AccountError> {
        if let Some(cached) = self.cache.get_by_login(login).await {
            return Ok(Some(cached));
        }
        let user = self.users.find_one_with_authorities_by_login(login).await?;
        if let Some(user) = &user {
            self.cache.put(user).await;
        }
        Ok(user)
    }

    pub async fn get_user_with_authorities_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserWithAuthorities>, AccountError> {
        if let Some(cached) = self.cache.get_by_email(email).await {
            return Ok(Some(cached));
        }
        let user = self
            .users
            .find_one_with_authorities_by_email_ignore_case(email)
            .await?;
        if let Some(user) = &user {
            self.cache.put(user).await;
        }
        Ok(user)
    }

    /// Names of every known authority
    pub async fn get_authorities(&self) -> Result<Vec<String>, AccountError> {
        let authorities = self.users.find_all_authorities().await?;
        Ok(authorities.into_iter().map(|a| a.name).collect())
    }

    pub async fn get_authority(&self, name: &str) -> Result<Option<AuthorityRecord>, AccountError> {
        Ok(self.users.find_authority(name).await?)
    }

    /// Delete registrations that were never activated and are older than the
    /// configured age at `now`. Returns how many users were removed.
    pub async fn remove_not_activated_users(
        &self,
        now: DateTime<Utc>,
    ) -> Result<usize, AccountError> {
        let cutoff = now
            .checked_sub_signed(self.config.stale_registration_age())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut removed = 0;

        loop {
            // rows are deleted as we go, so the first page always holds the next batch
            let batch = self
                .users
                .find_all_not_activated_created_before(cutoff, &PageRequest::of(0, PURGE_BATCH_SIZE))
                .await?;
            if batch.is_empty() {
                break;
            }
            for user in &batch.content {
                debug!("Deleting not activated user {}", user.login);
                self.remove(user).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Removed {} not activated users", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryUserCache;
    use crate::repositories::InMemoryUserStore;
    use chrono::Duration;

    const DEFAULT_LOGIN: &str = "johndoe";
    const DEFAULT_EMAIL: &str = "johndoe@localhost";

    struct Fixture {
        service: AccountService,
        store: Arc<InMemoryUserStore>,
        cache: Arc<InMemoryUserCache>,
        encoder: PasswordEncoder,
    }

    fn fixture() -> Fixture {
        fixture_with(AccountConfig::default())
    }

    fn fixture_with(config: AccountConfig) -> Fixture {
        let store = Arc::new(InMemoryUserStore::new());
        let cache = Arc::new(InMemoryUserCache::new());
        let encoder = PasswordEncoder::new();
        let service = AccountService::new(
            store.clone(),
            cache.clone(),
            encoder.clone(),
            config,
        );
        Fixture {
            service,
            store,
            cache,
            encoder,
        }
    }

    fn registration(login: &str, email: &str) -> AdminUserDto {
        AdminUserDto {
            login: login.to_string(),
            email: Some(email.to_string()),
            first_name: Some("john".to_string()),
            last_name: Some("doe".to_string()),
            lang_key: Some("en".to_string()),
            ..Default::default()
        }
    }

    async fn insert_user(fx: &Fixture, new_user: NewUser) -> User {
        fx.store.insert(&new_user).await.unwrap().user
    }

    async fn default_user(fx: &Fixture) -> User {
        let hash = fx.encoder.encode("currentPassword").unwrap();
        insert_user(fx, NewUser::new(DEFAULT_LOGIN, DEFAULT_EMAIL, hash)).await
    }

    #[tokio::test]
    async fn test_activate_registration() {
        let fx = fixture();
        let user = fx
            .service
            .register_user(&registration(DEFAULT_LOGIN, DEFAULT_EMAIL), "password")
            .await
            .unwrap();
        let key = user.activation_key.clone().unwrap();

        let activated = fx.service.activate_registration(&key).await.unwrap().unwrap();
        assert!(activated.activated);
        assert!(activated.activation_key.is_none());

        let stored = fx.store.find_one_by_login(DEFAULT_LOGIN).await.unwrap().unwrap();
        assert!(stored.activated);
    }

    #[tokio::test]
    async fn test_activate_with_wrong_key_changes_nothing() {
        let fx = fixture();
        let user = fx
            .service
            .register_user(&registration(DEFAULT_LOGIN, DEFAULT_EMAIL), "password")
            .await
            .unwrap();

        assert!(fx.service.activate_registration("wrong").await.unwrap().is_none());
        // keys are compared exactly
        let upper = user.activation_key.clone().unwrap().to_uppercase();
        if upper != user.activation_key.clone().unwrap() {
            assert!(fx.service.activate_registration(&upper).await.unwrap().is_none());
        }

        let stored = fx.store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored, user);
    }

    #[tokio::test]
    async fn test_request_password_reset_with_upper_case_email() {
        let fx = fixture();
        default_user(&fx).await;

        let user = fx
            .service
            .request_password_reset(&DEFAULT_EMAIL.to_uppercase())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.email.as_deref(), Some(DEFAULT_EMAIL));
        assert!(user.reset_key.is_some());
        assert!(user.reset_date.is_some());
    }

    #[tokio::test]
    async fn test_request_password_reset_requires_activated_user() {
        let fx = fixture();
        let mut new_user = NewUser::new(DEFAULT_LOGIN, DEFAULT_EMAIL, "hash");
        new_user.activated = false;
        new_user.activation_key = Some("activation".to_string());
        insert_user(&fx, new_user).await;

        assert!(fx
            .service
            .request_password_reset(DEFAULT_EMAIL)
            .await
            .unwrap()
            .is_none());
        assert!(fx
            .service
            .request_password_reset("invalid.login@localhost")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_complete_password_reset_with_expired_key() {
        let fx = fixture();
        let mut new_user = NewUser::new(DEFAULT_LOGIN, DEFAULT_EMAIL, "hash");
        new_user.reset_key = Some("reset-key".to_string());
        new_user.reset_date = Some(Utc::now() - Duration::hours(26));
        let user = insert_user(&fx, new_user).await;

        let result = fx
            .service
            .complete_password_reset("johndoe2", "reset-key")
            .await
            .unwrap();
        assert!(result.is_none());

        let stored = fx.store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored, user);
    }

    #[tokio::test]
    async fn test_complete_password_reset_with_wrong_key() {
        let fx = fixture();
        let mut new_user = NewUser::new(DEFAULT_LOGIN, DEFAULT_EMAIL, "hash");
        new_user.reset_key = Some("1234".to_string());
        new_user.reset_date = Some(Utc::now() - Duration::hours(1));
        let user = insert_user(&fx, new_user).await;

        let result = fx
            .service
            .complete_password_reset("johndoe2", "4321")
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(fx.store.find_by_id(user.id).await.unwrap().unwrap(), user);
    }

    #[tokio::test]
    async fn test_complete_password_reset() {
        let fx = fixture();
        let mut new_user = NewUser::new(DEFAULT_LOGIN, DEFAULT_EMAIL, "old-hash");
        new_user.reset_key = Some("reset-key".to_string());
        new_user.reset_date = Some(Utc::now() - Duration::hours(1));
        let user = insert_user(&fx, new_user).await;

        let updated = fx
            .service
            .complete_password_reset("johndoe2", "reset-key")
            .await
            .unwrap()
            .unwrap();
        assert!(updated.reset_key.is_none());
        assert!(updated.reset_date.is_none());
        assert_ne!(updated.password_hash, user.password_hash);
        assert!(fx.encoder.matches("johndoe2", &updated.password_hash));
    }

    #[tokio::test]
    async fn test_register_user() {
        let fx = fixture();
        let user = fx
            .service
            .register_user(&registration("bob", "Bob@Example.com"), "password")
            .await
            .unwrap();

        assert!(!user.activated);
        assert!(user.activation_key.is_some());
        assert_eq!(user.email.as_deref(), Some("bob@example.com"));
        assert!(fx.encoder.matches("password", &user.password_hash));

        let stored = fx
            .store
            .find_one_with_authorities_by_login("bob")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.authorities,
            BTreeSet::from(["ROLE_USER".to_string()])
        );
    }

    #[tokio::test]
    async fn test_register_rejects_activated_login() {
        let fx = fixture();
        default_user(&fx).await;
        let before = fx.store.count().await.unwrap();

        let err = fx
            .service
            .register_user(&registration(DEFAULT_LOGIN, "other@example.com"), "password")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::LoginAlreadyUsed));
        assert_eq!(fx.store.count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_register_rejects_activated_email_ignoring_case() {
        let fx = fixture();
        default_user(&fx).await;
        let before = fx.store.count().await.unwrap();

        let err = fx
            .service
            .register_user(&registration("other", "JohnDoe@Localhost"), "password")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::EmailAlreadyUsed));
        assert_eq!(fx.store.count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_register_over_abandoned_registration() {
        let fx = fixture();
        let first = fx
            .service
            .register_user(&registration("alice", "alice@example.com"), "password")
            .await
            .unwrap();
        let before = fx.store.count().await.unwrap();

        let mut again = registration("alice", "alice2@example.com");
        again.first_name = Some("Alicia".to_string());
        let second = fx.service.register_user(&again, "password").await.unwrap();

        assert_eq!(fx.store.count().await.unwrap(), before);
        assert_ne!(first.id, second.id);
        assert!(fx.store.find_by_id(first.id).await.unwrap().is_none());

        let stored = fx.store.find_one_by_login("alice").await.unwrap().unwrap();
        assert_eq!(stored.first_name.as_deref(), Some("Alicia"));
        assert_eq!(stored.email.as_deref(), Some("alice2@example.com"));
    }

    #[tokio::test]
    async fn test_failed_registration_keeps_abandoned_signup() {
        let fx = fixture();
        let abandoned = fx
            .service
            .register_user(&registration("alice", "alice@example.com"), "password")
            .await
            .unwrap();
        insert_user(&fx, NewUser::new("bob", "bob@example.com", "hash")).await;

        let err = fx
            .service
            .register_user(&registration("alice", "bob@example.com"), "password")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::EmailAlreadyUsed));

        assert_eq!(fx.store.count().await.unwrap(), 2);
        let stored = fx.store.find_one_by_login("alice").await.unwrap().unwrap();
        assert_eq!(stored, abandoned);
    }

    #[tokio::test]
    async fn test_register_replaces_one_record_holding_login_and_email() {
        let fx = fixture();
        let first = fx
            .service
            .register_user(&registration("alice", "alice@example.com"), "password")
            .await
            .unwrap();

        let second = fx
            .service
            .register_user(&registration("alice", "ALICE@example.com"), "password")
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(fx.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_register_over_abandoned_email() {
        let fx = fixture();
        let first = fx
            .service
            .register_user(&registration("alice", "alice@example.com"), "password")
            .await
            .unwrap();

        fx.service
            .register_user(&registration("alice2", "ALICE@example.com"), "password")
            .await
            .unwrap();

        assert!(fx.store.find_by_id(first.id).await.unwrap().is_none());
        assert_eq!(fx.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_payload() {
        let fx = fixture();
        let err = fx
            .service
            .register_user(&registration("funky-log(n", "funky@example.com"), "password")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::Validation(_)));
        assert_eq!(fx.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_user() {
        let fx = fixture();
        let mut dto = registration("admin-made", "made@example.com");
        dto.lang_key = None;
        dto.activated = true;
        dto.authorities = BTreeSet::from(["ROLE_ADMIN".to_string(), "ROLE_USER".to_string()]);

        let user = fx.service.create_user(&dto).await.unwrap();
        assert!(user.activated);
        assert!(user.activation_key.is_none());
        assert_eq!(user.lang_key, DEFAULT_LANGUAGE);
        assert!(user.reset_key.is_some());
        assert!(user.reset_date.is_some());

        let stored = fx
            .store
            .find_one_with_authorities_by_login("admin-made")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.authorities, dto.authorities);
    }

    #[tokio::test]
    async fn test_create_user_rejects_unknown_authority() {
        let fx = fixture();
        let mut dto = registration("admin-made", "made@example.com");
        dto.authorities = BTreeSet::from(["ROLE_ROOT".to_string()]);

        let err = fx.service.create_user(&dto).await.unwrap_err();
        assert!(matches!(err, AccountError::UnknownAuthority(name) if name == "ROLE_ROOT"));
    }

    #[tokio::test]
    async fn test_create_user_rejects_existing_login() {
        let fx = fixture();
        default_user(&fx).await;

        let err = fx
            .service
            .create_user(&registration(DEFAULT_LOGIN, "new@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::LoginAlreadyUsed));
    }

    #[tokio::test]
    async fn test_update_user() {
        let fx = fixture();
        let user = default_user(&fx).await;

        let mut dto = registration("renamed", "renamed@example.com");
        dto.id = Some(user.id);
        dto.activated = true;
        dto.authorities = BTreeSet::from(["ROLE_ADMIN".to_string()]);

        let updated = fx.service.update_user(&dto).await.unwrap().unwrap();
        assert_eq!(updated.user.login, "renamed");
        assert_eq!(updated.authorities, dto.authorities);
        assert!(fx.store.find_one_by_login(DEFAULT_LOGIN).await.unwrap().is_none());

        let stored = fx
            .store
            .find_one_with_authorities_by_id(user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.authorities, dto.authorities);
        assert_eq!(stored.user.created_date, user.created_date);
    }

    #[tokio::test]
    async fn test_update_user_leaves_no_stale_cache_entry() {
        let fx = fixture();
        let user = default_user(&fx).await;
        fx.service
            .get_user_with_authorities_by_login(DEFAULT_LOGIN)
            .await
            .unwrap();
        assert!(!fx.cache.is_empty().await);

        let mut dto = registration(DEFAULT_LOGIN, DEFAULT_EMAIL);
        dto.id = Some(user.id);
        dto.activated = true;
        dto.authorities = BTreeSet::from(["ROLE_ADMIN".to_string(), "ROLE_USER".to_string()]);
        fx.service.update_user(&dto).await.unwrap().unwrap();
        assert!(fx.cache.is_empty().await);

        let reloaded = fx
            .service
            .get_user_with_authorities_by_login(DEFAULT_LOGIN)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.authorities, dto.authorities);
    }

    #[tokio::test]
    async fn test_update_user_with_unknown_authority_changes_nothing() {
        let fx = fixture();
        let user = default_user(&fx).await;

        let mut dto = registration("renamed", "renamed@example.com");
        dto.id = Some(user.id);
        dto.authorities = BTreeSet::from(["ROLE_ROOT".to_string()]);
        let err = fx.service.update_user(&dto).await.unwrap_err();
        assert!(matches!(err, AccountError::UnknownAuthority(_)));

        let stored = fx
            .store
            .find_one_with_authorities_by_id(user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user, user);
    }

    #[tokio::test]
    async fn test_update_unknown_user_is_empty() {
        let fx = fixture();
        let mut dto = registration("ghost", "ghost@example.com");
        dto.id = Some(42);
        assert!(fx.service.update_user(&dto).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_user_rejects_email_of_other_user() {
        let fx = fixture();
        default_user(&fx).await;
        let other = insert_user(&fx, NewUser::new("other", "other@example.com", "hash")).await;

        let mut dto = registration("other", DEFAULT_EMAIL);
        dto.id = Some(other.id);
        let err = fx.service.update_user(&dto).await.unwrap_err();
        assert!(matches!(err, AccountError::EmailAlreadyUsed));
    }

    #[tokio::test]
    async fn test_update_basic_info_keeps_absent_email() {
        let fx = fixture();
        default_user(&fx).await;

        let user = fx
            .service
            .update_basic_info(
                DEFAULT_LOGIN,
                Some("John".to_string()),
                Some("Doe".to_string()),
                None,
                Some("fr".to_string()),
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.email.as_deref(), Some(DEFAULT_EMAIL));
        assert_eq!(user.first_name.as_deref(), Some("John"));
        assert_eq!(user.lang_key, "fr");
    }

    #[tokio::test]
    async fn test_change_password() {
        let fx = fixture();
        default_user(&fx).await;

        let err = fx
            .service
            .change_password(DEFAULT_LOGIN, "wrongPassword", "newPassword")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidCurrentPassword));
        let stored = fx.store.find_one_by_login(DEFAULT_LOGIN).await.unwrap().unwrap();
        assert!(fx.encoder.matches("currentPassword", &stored.password_hash));

        fx.service
            .change_password(DEFAULT_LOGIN, "currentPassword", "newPassword")
            .await
            .unwrap();
        let stored = fx.store.find_one_by_login(DEFAULT_LOGIN).await.unwrap().unwrap();
        assert!(fx.encoder.matches("newPassword", &stored.password_hash));
    }

    #[tokio::test]
    async fn test_delete_unknown_user_is_a_noop() {
        let fx = fixture();
        default_user(&fx).await;

        fx.service.delete_user("nobody").await.unwrap();
        assert_eq!(fx.store.count().await.unwrap(), 1);

        fx.service.delete_user(DEFAULT_LOGIN).await.unwrap();
        assert_eq!(fx.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_public_users_exclude_non_activated() {
        let fx = fixture();
        default_user(&fx).await;
        fx.service
            .register_user(&registration("pending", "pending@example.com"), "password")
            .await
            .unwrap();

        let public = fx
            .service
            .get_all_public_users(&PageRequest::default())
            .await
            .unwrap();
        assert_eq!(public.total, 1);
        assert!(public.content.iter().all(|u| u.activated));

        let managed = fx
            .service
            .get_all_managed_users(&PageRequest::default())
            .await
            .unwrap();
        assert_eq!(managed.total, 2);
    }

    #[tokio::test]
    async fn test_lookups_populate_and_mutations_evict_cache() {
        let fx = fixture();
        default_user(&fx).await;

        let found = fx
            .service
            .get_user_with_authorities_by_login(DEFAULT_LOGIN)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.user.login, DEFAULT_LOGIN);
        assert!(fx.cache.get_by_login(DEFAULT_LOGIN).await.is_some());
        assert!(fx.cache.get_by_email("JOHNDOE@localhost").await.is_some());

        fx.service
            .change_password(DEFAULT_LOGIN, "currentPassword", "newPassword")
            .await
            .unwrap();
        assert!(fx.cache.is_empty().await);

        let by_email = fx
            .service
            .get_user_with_authorities_by_email("JOHNDOE@LOCALHOST")
            .await
            .unwrap()
            .unwrap();
        assert!(fx.encoder.matches("newPassword", &by_email.user.password_hash));
    }

    #[tokio::test]
    async fn test_get_authorities() {
        let fx = fixture();
        let authorities = fx.service.get_authorities().await.unwrap();
        assert!(authorities.contains(&"ROLE_ADMIN".to_string()));
        assert!(authorities.contains(&"ROLE_USER".to_string()));
        assert!(fx.service.get_authority("ROLE_ROOT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_windows_do_not_overflow() {
        let fx = fixture_with(AccountConfig {
            reset_key_validity_hours: i64::MAX,
            stale_registration_days: i64::MAX,
            ..AccountConfig::default()
        });
        let mut new_user = NewUser::new(DEFAULT_LOGIN, DEFAULT_EMAIL, "hash");
        new_user.reset_key = Some("reset-key".to_string());
        new_user.reset_date = Some(Utc::now() - Duration::days(365));
        insert_user(&fx, new_user).await;

        let mut pending = NewUser::new("pending", "pending@example.com", "hash");
        pending.activated = false;
        pending.activation_key = Some("pending-key".to_string());
        pending.created_date = Utc::now() - Duration::days(365);
        insert_user(&fx, pending).await;

        let reset = fx
            .service
            .complete_password_reset("johndoe2", "reset-key")
            .await
            .unwrap();
        assert!(reset.is_some());

        let removed = fx.service.remove_not_activated_users(Utc::now()).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_remove_not_activated_users() {
        let fx = fixture();
        let now = Utc::now();

        let mut stale = NewUser::new("stale", "stale@example.com", "hash");
        stale.activated = false;
        stale.activation_key = Some("stale-key".to_string());
        stale.created_date = now - Duration::days(4);
        insert_user(&fx, stale).await;

        let mut fresh = NewUser::new("fresh", "fresh@example.com", "hash");
        fresh.activated = false;
        fresh.activation_key = Some("fresh-key".to_string());
        fresh.created_date = now - Duration::days(1);
        insert_user(&fx, fresh).await;

        let mut old_active = NewUser::new("active", "active@example.com", "hash");
        old_active.created_date = now - Duration::days(10);
        insert_user(&fx, old_active).await;

        let removed = fx.service.remove_not_activated_users(now).await.unwrap();
        assert_eq!(removed, 1);
        assert!(fx.store.find_one_by_login("stale").await.unwrap().is_none());
        assert!(fx.store.find_one_by_login("fresh").await.unwrap().is_some());
        assert!(fx.store.find_one_by_login("active").await.unwrap().is_some());
    }
}
