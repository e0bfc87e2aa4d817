use anyhow::Result;
use sqlx::migrate::Migrator;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use account::{
    AppState,
    cache::{InMemoryUserCache, RedisUserCache, UserCache},
    cleanup::StaleRegistrationCleanup,
    config::AccountConfig,
    mail::{LogMailTransport, MailService},
    repositories::{PgLedgerRepository, PgUserRepository},
    routes,
    security::PasswordEncoder,
    service::AccountService,
};
use common::cache::{RedisConfig, RedisPool};
use common::database::{DatabaseConfig, health_check, init_pool, run_migrations};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting account service");

    let config = AccountConfig::from_env()?;
    if config.admin_token.is_none() {
        warn!("ADMIN_API_TOKEN is unset; /api/admin routes are open and must sit behind a gateway");
    }

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    if health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    run_migrations(&pool, &MIGRATOR).await?;

    // Fall back to an in-process cache when Redis is not reachable
    let redis = RedisPool::new(&RedisConfig::from_env()?).await?;
    let user_cache: Arc<dyn UserCache> = match redis.health_check().await {
        Ok(true) => {
            info!("Redis connection successful");
            Arc::new(RedisUserCache::new(redis, config.user_cache_ttl_seconds))
        }
        _ => {
            warn!("Redis unavailable, caching users in memory");
            Arc::new(InMemoryUserCache::new())
        }
    };

    let account_service = AccountService::new(
        Arc::new(PgUserRepository::new(pool.clone())),
        user_cache,
        PasswordEncoder::new(),
        config.clone(),
    );
    let mail_service = MailService::new(
        Arc::new(LogMailTransport),
        config.mail_from.clone(),
        config.mail_base_url.clone(),
    );

    // Keep the scheduler handle alive for the lifetime of the server
    let _scheduler = StaleRegistrationCleanup::new(account_service.clone())
        .start(&config.cleanup_cron)
        .await?;

    let app_state = AppState {
        account_service,
        mail_service,
        ledger: Arc::new(PgLedgerRepository::new(pool)),
    };

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Account service listening on {}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
