//! User lookup cache with explicit eviction
//!
//! Reads go through the cache; every mutation of a user is followed by an
//! [`UserCache::evict`] call from the account service. Cache failures are
//! logged and behave like misses.

use async_trait::async_trait;
use common::cache::RedisPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::models::{User, UserWithAuthorities};

fn login_key(login: &str) -> String {
    format!("users_by_login:{}", login)
}

fn email_key(email: &str) -> String {
    format!("users_by_email:{}", email.to_lowercase())
}

fn keys_for(user: &User) -> Vec<String> {
    let mut keys = vec![login_key(&user.login)];
    if let Some(email) = &user.email {
        keys.push(email_key(email));
    }
    keys
}

#[async_trait]
pub trait UserCache: Send + Sync {
    async fn get_by_login(&self, login: &str) -> Option<UserWithAuthorities>;

    async fn get_by_email(&self, email: &str) -> Option<UserWithAuthorities>;

    async fn put(&self, user: &UserWithAuthorities);

    /// Drop every entry that points at this user
    async fn evict(&self, user: &User);
}

/// Cache stored in Redis as JSON documents
#[derive(Clone)]
pub struct RedisUserCache {
    redis: RedisPool,
    ttl_seconds: u64,
}

impl RedisUserCache {
    pub fn new(redis: RedisPool, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }

    async fn get(&self, key: &str) -> Option<UserWithAuthorities> {
        match self.redis.get_json(key).await {
            Ok(user) => user,
            Err(e) => {
                warn!("User cache read failed for {}: {:#}", key, e);
                None
            }
        }
    }
}

#[async_trait]
impl UserCache for RedisUserCache {
    async fn get_by_login(&self, login: &str) -> Option<UserWithAuthorities> {
        self.get(&login_key(login)).await
    }

    async fn get_by_email(&self, email: &str) -> Option<UserWithAuthorities> {
        self.get(&email_key(email)).await
    }

    async fn put(&self, user: &UserWithAuthorities) {
        for key in keys_for(&user.user) {
            if let Err(e) = self.redis.set_json(&key, user, Some(self.ttl_seconds)).await {
                warn!("User cache write failed for {}: {:#}", key, e);
            }
        }
    }

    async fn evict(&self, user: &User) {
        if let Err(e) = self.redis.delete(&keys_for(user)).await {
            warn!("User cache eviction failed for {}: {}", user.login, e);
        }
    }
}

/// Cache kept in process memory
#[derive(Clone, Default)]
pub struct InMemoryUserCache {
    entries: Arc<Mutex<HashMap<String, UserWithAuthorities>>>,
}

impl InMemoryUserCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl UserCache for InMemoryUserCache {
    async fn get_by_login(&self, login: &str) -> Option<UserWithAuthorities> {
        self.entries.lock().await.get(&login_key(login)).cloned()
    }

    async fn get_by_email(&self, email: &str) -> Option<UserWithAuthorities> {
        self.entries.lock().await.get(&email_key(email)).cloned()
    }

    async fn put(&self, user: &UserWithAuthorities) {
        let mut entries = self.entries.lock().await;
        for key in keys_for(&user.user) {
            entries.insert(key, user.clone());
        }
    }

    async fn evict(&self, user: &User) {
        let mut entries = self.entries.lock().await;
        for key in keys_for(user) {
            entries.remove(&key);
        }
    }
}
