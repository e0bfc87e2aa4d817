//! Scheduled purge of registrations that were never activated

use anyhow::Result;
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::service::AccountService;

#[derive(Clone)]
pub struct StaleRegistrationCleanup {
    account_service: AccountService,
}

impl StaleRegistrationCleanup {
    pub fn new(account_service: AccountService) -> Self {
        Self { account_service }
    }

    /// Run one purge pass. Failures are logged and reported as zero removals.
    pub async fn run_once(&self) -> usize {
        match self.account_service.remove_not_activated_users(Utc::now()).await {
            Ok(removed) => removed,
            Err(e) => {
                error!("Failed to remove not activated users: {}", e);
                0
            }
        }
    }

    /// Register the purge job on a new scheduler and start it
    ///
    /// The returned scheduler must be kept alive for the job to keep firing.
    pub async fn start(&self, schedule: &str) -> Result<JobScheduler> {
        let cleanup = self.clone();

        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(schedule, move |_, _| {
            let cleanup = cleanup.clone();
            Box::pin(async move {
                let removed = cleanup.run_once().await;
                info!("Stale registration cleanup removed {} users", removed);
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("Stale registration cleanup scheduled with '{}'", schedule);
        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryUserCache;
    use crate::config::AccountConfig;
    use crate::models::NewUser;
    use crate::repositories::{InMemoryUserStore, UserStore};
    use crate::security::PasswordEncoder;
    use chrono::Duration;
    use std::sync::Arc;

    fn cleanup(store: Arc<InMemoryUserStore>) -> StaleRegistrationCleanup {
        StaleRegistrationCleanup::new(AccountService::new(
            store,
            Arc::new(InMemoryUserCache::new()),
            PasswordEncoder::new(),
            AccountConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_run_once_purges_stale_registrations() {
        let store = Arc::new(InMemoryUserStore::new());
        let mut stale = NewUser::new("stale", "stale@example.com", "hash");
        stale.activated = false;
        stale.activation_key = Some("key".to_string());
        stale.created_date = Utc::now() - Duration::days(5);
        store.insert(&stale).await.unwrap();

        assert_eq!(cleanup(store.clone()).run_once().await, 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_schedule() {
        let store = Arc::new(InMemoryUserStore::new());
        assert!(cleanup(store).start("not a cron").await.is_err());
    }
}
