//! Storage contracts for users, authorities and the ledger
//!
//! Every method is a single atomic storage call. Missing rows are reported
//! as `None` (or an empty page), never as an error; constraint violations
//! surface as [`DatabaseError::UniqueViolation`] or
//! [`DatabaseError::ForeignKeyViolation`].
//!
//! [`DatabaseError::UniqueViolation`]: common::error::DatabaseError::UniqueViolation
//! [`DatabaseError::ForeignKeyViolation`]: common::error::DatabaseError::ForeignKeyViolation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use common::pagination::{Page, PageRequest};
use std::collections::BTreeSet;

use crate::models::{
    AuthorityRecord, BankAccount, NewBankAccount, NewOperation, NewUser, Operation,
    OperationWithAccount, User, UserWithAuthorities,
};

pub mod ledger;
pub mod memory;
pub mod user;

pub use ledger::PgLedgerRepository;
pub use memory::{InMemoryLedgerStore, InMemoryUserStore};
pub use user::PgUserRepository;

/// Unique constraint on `app_user.login`
pub const LOGIN_CONSTRAINT: &str = "ux_user_login";
/// Unique index on `lower(app_user.email)`
pub const EMAIL_CONSTRAINT: &str = "ux_user_email";
/// Foreign key from `operation` to `bank_account`
pub const OPERATION_ACCOUNT_CONSTRAINT: &str = "fk_operation_bank_account";

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn count(&self) -> DatabaseResult<i64>;

    async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<User>>;

    /// Exact, case-sensitive login match
    async fn find_one_by_login(&self, login: &str) -> DatabaseResult<Option<User>>;

    async fn find_one_by_email_ignore_case(&self, email: &str) -> DatabaseResult<Option<User>>;

    async fn find_one_by_activation_key(&self, key: &str) -> DatabaseResult<Option<User>>;

    async fn find_one_by_reset_key(&self, key: &str) -> DatabaseResult<Option<User>>;

    async fn find_one_with_authorities_by_login(
        &self,
        login: &str,
    ) -> DatabaseResult<Option<UserWithAuthorities>>;

    async fn find_one_with_authorities_by_email_ignore_case(
        &self,
        email: &str,
    ) -> DatabaseResult<Option<UserWithAuthorities>>;

    async fn find_one_with_authorities_by_id(
        &self,
        id: i64,
    ) -> DatabaseResult<Option<UserWithAuthorities>>;

    /// Every user, ordered by id, with authorities
    async fn find_all(&self, page: &PageRequest) -> DatabaseResult<Page<UserWithAuthorities>>;

    /// Activated users only, ordered by id
    async fn find_all_activated(&self, page: &PageRequest) -> DatabaseResult<Page<User>>;

    /// Non-activated users still holding an activation key, created strictly before `cutoff`
    async fn find_all_not_activated_created_before(
        &self,
        cutoff: DateTime<Utc>,
        page: &PageRequest,
    ) -> DatabaseResult<Page<User>>;

    /// Insert the user row and its authority rows as one unit
    async fn insert(&self, new_user: &NewUser) -> DatabaseResult<UserWithAuthorities>;

    /// Delete the given abandoned registrations and insert `new_user` as one
    /// unit; on any failure nothing is deleted
    async fn replace_registrations(
        &self,
        stale_ids: &[i64],
        new_user: &NewUser,
    ) -> DatabaseResult<UserWithAuthorities>;

    /// Overwrite every mutable column of an existing user
    async fn update(&self, user: &User) -> DatabaseResult<User>;

    /// Overwrite the user row and replace its authority set as one unit
    async fn update_with_authorities(
        &self,
        user: &User,
        authorities: &BTreeSet<String>,
    ) -> DatabaseResult<UserWithAuthorities>;

    /// Delete a user and its authority rows; deleting a missing id is a no-op
    async fn delete(&self, id: i64) -> DatabaseResult<()>;

    async fn find_all_authorities(&self) -> DatabaseResult<Vec<AuthorityRecord>>;

    async fn find_authority(&self, name: &str) -> DatabaseResult<Option<AuthorityRecord>>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_bank_account(&self, account: &NewBankAccount) -> DatabaseResult<BankAccount>;

    async fn delete_bank_account(&self, id: i64) -> DatabaseResult<()>;

    async fn insert_operation(&self, operation: &NewOperation) -> DatabaseResult<Operation>;

    async fn delete_operation(&self, id: i64) -> DatabaseResult<()>;

    async fn count_operations(&self) -> DatabaseResult<i64>;

    async fn find_operation_with_account(
        &self,
        id: i64,
    ) -> DatabaseResult<Option<OperationWithAccount>>;

    async fn find_all_operations_with_accounts(
        &self,
        page: &PageRequest,
    ) -> DatabaseResult<Page<OperationWithAccount>>;

    async fn find_operations_by_account(&self, bank_account_id: i64)
    -> DatabaseResult<Vec<Operation>>;
}
