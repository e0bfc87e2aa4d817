//! User repository backed by PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use common::pagination::{Page, PageRequest};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::BTreeSet;
use tracing::debug;

use super::UserStore;
use crate::models::{AuthorityRecord, NewUser, User, UserWithAuthorities};

const USER_COLUMNS: &str = "u.id, u.login, u.password_hash, u.first_name, u.last_name, \
     u.email, u.image_url, u.activated, u.lang_key, u.activation_key, u.reset_key, \
     u.reset_date, u.created_by, u.created_date, u.last_modified_by, u.last_modified_date";

/// Aggregates the authority names of each user into one array column
const AUTHORITIES_COLUMN: &str = "COALESCE(ARRAY_AGG(ua.authority_name ORDER BY ua.authority_name) \
     FILTER (WHERE ua.authority_name IS NOT NULL), ARRAY[]::VARCHAR[]) AS authorities";

#[derive(FromRow)]
struct UserAuthoritiesRow {
    #[sqlx(flatten)]
    user: User,
    authorities: Vec<String>,
}

impl From<UserAuthoritiesRow> for UserWithAuthorities {
    fn from(row: UserAuthoritiesRow) -> Self {
        Self {
            user: row.user,
            authorities: row.authorities.into_iter().collect(),
        }
    }
}

async fn insert_authorities(
    conn: &mut PgConnection,
    user_id: i64,
    authorities: &BTreeSet<String>,
) -> DatabaseResult<()> {
    for name in authorities {
        sqlx::query("INSERT INTO user_authority (user_id, authority_name) VALUES ($1, $2)")
            .bind(user_id)
            .bind(name)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn insert_user(
    conn: &mut PgConnection,
    new_user: &NewUser,
) -> DatabaseResult<UserWithAuthorities> {
    let sql = format!(
        "INSERT INTO app_user AS u (login, password_hash, first_name, last_name, email, \
         image_url, activated, lang_key, activation_key, reset_key, reset_date, \
         created_by, created_date) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         RETURNING {USER_COLUMNS}"
    );
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(&new_user.login)
        .bind(&new_user.password_hash)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.email)
        .bind(&new_user.image_url)
        .bind(new_user.activated)
        .bind(&new_user.lang_key)
        .bind(&new_user.activation_key)
        .bind(&new_user.reset_key)
        .bind(new_user.reset_date)
        .bind(&new_user.created_by)
        .bind(new_user.created_date)
        .fetch_one(&mut *conn)
        .await?;

    insert_authorities(conn, user.id, &new_user.authorities).await?;

    Ok(UserWithAuthorities {
        user,
        authorities: new_user.authorities.clone(),
    })
}

/// Overwrite the mutable columns; created_* are never rewritten
async fn update_user(conn: &mut PgConnection, user: &User) -> DatabaseResult<User> {
    let sql = format!(
        "UPDATE app_user AS u SET login = $2, password_hash = $3, first_name = $4, \
         last_name = $5, email = $6, image_url = $7, activated = $8, lang_key = $9, \
         activation_key = $10, reset_key = $11, reset_date = $12, \
         last_modified_by = $13, last_modified_date = $14 \
         WHERE u.id = $1 RETURNING {USER_COLUMNS}"
    );
    let updated = sqlx::query_as::<_, User>(&sql)
        .bind(user.id)
        .bind(&user.login)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.image_url)
        .bind(user.activated)
        .bind(&user.lang_key)
        .bind(&user.activation_key)
        .bind(&user.reset_key)
        .bind(user.reset_date)
        .bind(&user.last_modified_by)
        .bind(user.last_modified_date)
        .fetch_one(&mut *conn)
        .await?;
    Ok(updated)
}

/// User repository
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one_where(&self, predicate: &str, value: &str) -> DatabaseResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM app_user u WHERE {predicate}");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Single statement that loads a user and its authority names
    fn eager_sql(predicate: &str) -> String {
        format!(
            "SELECT {USER_COLUMNS}, {AUTHORITIES_COLUMN} \
             FROM app_user u LEFT JOIN user_authority ua ON ua.user_id = u.id \
             WHERE {predicate} GROUP BY u.id"
        )
    }

    async fn find_one_eager(
        &self,
        predicate: &str,
        value: &str,
    ) -> DatabaseResult<Option<UserWithAuthorities>> {
        let sql = Self::eager_sql(predicate);
        let row = sqlx::query_as::<_, UserAuthoritiesRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl UserStore for PgUserRepository {
    async fn count(&self) -> DatabaseResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM app_user")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM app_user u WHERE u.id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_one_by_login(&self, login: &str) -> DatabaseResult<Option<User>> {
        debug!("Finding user by login: {}", login);
        self.find_one_where("u.login = $1", login).await
    }

    async fn find_one_by_email_ignore_case(&self, email: &str) -> DatabaseResult<Option<User>> {
        debug!("Finding user by email: {}", email);
        self.find_one_where("LOWER(u.email) = LOWER($1)", email)
            .await
    }

    async fn find_one_by_activation_key(&self, key: &str) -> DatabaseResult<Option<User>> {
        self.find_one_where("u.activation_key = $1", key).await
    }

    async fn find_one_by_reset_key(&self, key: &str) -> DatabaseResult<Option<User>> {
        self.find_one_where("u.reset_key = $1", key).await
    }

    async fn find_one_with_authorities_by_login(
        &self,
        login: &str,
    ) -> DatabaseResult<Option<UserWithAuthorities>> {
        self.find_one_eager("u.login = $1", login).await
    }

    async fn find_one_with_authorities_by_email_ignore_case(
        &self,
        email: &str,
    ) -> DatabaseResult<Option<UserWithAuthorities>> {
        self.find_one_eager("LOWER(u.email) = LOWER($1)", email)
            .await
    }

    async fn find_one_with_authorities_by_id(
        &self,
        id: i64,
    ) -> DatabaseResult<Option<UserWithAuthorities>> {
        let sql = Self::eager_sql("u.id = $1");
        let row = sqlx::query_as::<_, UserAuthoritiesRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn find_all(&self, page: &PageRequest) -> DatabaseResult<Page<UserWithAuthorities>> {
        let sql = format!(
            "SELECT {USER_COLUMNS}, {AUTHORITIES_COLUMN} \
             FROM app_user u LEFT JOIN user_authority ua ON ua.user_id = u.id \
             GROUP BY u.id ORDER BY u.id LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query_as::<_, UserAuthoritiesRow>(&sql)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let total = self.count().await?;
        Ok(Page::new(
            rows.into_iter().map(Into::into).collect(),
            page,
            total,
        ))
    }

    async fn find_all_activated(&self, page: &PageRequest) -> DatabaseResult<Page<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM app_user u WHERE u.activated = TRUE \
             ORDER BY u.id LIMIT $1 OFFSET $2"
        );
        let users = sqlx::query_as::<_, User>(&sql)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM app_user WHERE activated = TRUE")
            .fetch_one(&self.pool)
            .await?;

        Ok(Page::new(users, page, total))
    }

    async fn find_all_not_activated_created_before(
        &self,
        cutoff: DateTime<Utc>,
        page: &PageRequest,
    ) -> DatabaseResult<Page<User>> {
        const PREDICATE: &str =
            "u.activated = FALSE AND u.activation_key IS NOT NULL AND u.created_date < $1";

        let sql = format!(
            "SELECT {USER_COLUMNS} FROM app_user u WHERE {PREDICATE} \
             ORDER BY u.id LIMIT $2 OFFSET $3"
        );
        let users = sqlx::query_as::<_, User>(&sql)
            .bind(cutoff)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let count_sql = format!("SELECT COUNT(*) FROM app_user u WHERE {PREDICATE}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;

        Ok(Page::new(users, page, total))
    }

    async fn insert(&self, new_user: &NewUser) -> DatabaseResult<UserWithAuthorities> {
        debug!("Inserting user: {}", new_user.login);

        let mut tx = self.pool.begin().await?;
        let created = insert_user(&mut tx, new_user).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn replace_registrations(
        &self,
        stale_ids: &[i64],
        new_user: &NewUser,
    ) -> DatabaseResult<UserWithAuthorities> {
        debug!(
            "Replacing {} abandoned registrations with user: {}",
            stale_ids.len(),
            new_user.login
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM app_user WHERE id = ANY($1)")
            .bind(stale_ids)
            .execute(&mut *tx)
            .await?;
        let created = insert_user(&mut tx, new_user).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn update(&self, user: &User) -> DatabaseResult<User> {
        let mut conn = self.pool.acquire().await?;
        update_user(&mut conn, user).await
    }

    async fn update_with_authorities(
        &self,
        user: &User,
        authorities: &BTreeSet<String>,
    ) -> DatabaseResult<UserWithAuthorities> {
        let mut tx = self.pool.begin().await?;

        let updated = update_user(&mut tx, user).await?;
        sqlx::query("DELETE FROM user_authority WHERE user_id = $1")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
        insert_authorities(&mut tx, user.id, authorities).await?;

        tx.commit().await?;
        Ok(UserWithAuthorities {
            user: updated,
            authorities: authorities.clone(),
        })
    }

    async fn delete(&self, id: i64) -> DatabaseResult<()> {
        // user_authority rows go with the user through ON DELETE CASCADE
        sqlx::query("DELETE FROM app_user WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_all_authorities(&self) -> DatabaseResult<Vec<AuthorityRecord>> {
        let authorities =
            sqlx::query_as::<_, AuthorityRecord>("SELECT name FROM authority ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(authorities)
    }

    async fn find_authority(&self, name: &str) -> DatabaseResult<Option<AuthorityRecord>> {
        let authority =
            sqlx::query_as::<_, AuthorityRecord>("SELECT name FROM authority WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(authority)
    }
}
