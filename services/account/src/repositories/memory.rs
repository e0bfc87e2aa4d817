//! In-memory stores with the same constraint semantics as the PostgreSQL schema
//!
//! Used by the test suites and for running the service without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use common::pagination::{Page, PageRequest};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{
    EMAIL_CONSTRAINT, LOGIN_CONSTRAINT, LedgerStore, OPERATION_ACCOUNT_CONSTRAINT, UserStore,
};
use crate::models::{
    Authority, AuthorityRecord, BankAccount, NewBankAccount, NewOperation, NewUser, Operation,
    OperationWithAccount, User, UserWithAuthorities,
};

const USER_AUTHORITY_CONSTRAINT: &str = "user_authority_authority_name_fkey";

fn same_email(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
        _ => false,
    }
}

struct UserTables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    user_authorities: BTreeMap<i64, BTreeSet<String>>,
    authorities: BTreeSet<String>,
}

impl UserTables {
    fn with_authorities(&self, user: &User) -> UserWithAuthorities {
        UserWithAuthorities {
            user: user.clone(),
            authorities: self
                .user_authorities
                .get(&user.id)
                .cloned()
                .unwrap_or_default(),
        }
    }

    fn find(&self, predicate: impl Fn(&User) -> bool) -> Option<&User> {
        self.users.values().find(|u| predicate(u))
    }

    /// Enforce the login and email unique constraints against every row not in `skip`
    fn check_unique(&self, skip: &[i64], login: &str, email: Option<&str>) -> DatabaseResult<()> {
        for other in self.users.values().filter(|u| !skip.contains(&u.id)) {
            if other.login == login {
                return Err(DatabaseError::UniqueViolation(LOGIN_CONSTRAINT.to_string()));
            }
            if same_email(other.email.as_deref(), email) {
                return Err(DatabaseError::UniqueViolation(EMAIL_CONSTRAINT.to_string()));
            }
        }
        Ok(())
    }

    fn check_update(&self, user: &User) -> DatabaseResult<()> {
        if !self.users.contains_key(&user.id) {
            return Err(DatabaseError::Query(sqlx::Error::RowNotFound));
        }
        self.check_unique(&[user.id], &user.login, user.email.as_deref())
    }

    fn insert_row(&mut self, new_user: &NewUser) -> UserWithAuthorities {
        let id = self.next_id;
        self.next_id += 1;

        let user = User {
            id,
            login: new_user.login.clone(),
            password_hash: new_user.password_hash.clone(),
            first_name: new_user.first_name.clone(),
            last_name: new_user.last_name.clone(),
            email: new_user.email.clone(),
            image_url: new_user.image_url.clone(),
            activated: new_user.activated,
            lang_key: new_user.lang_key.clone(),
            activation_key: new_user.activation_key.clone(),
            reset_key: new_user.reset_key.clone(),
            reset_date: new_user.reset_date,
            created_by: new_user.created_by.clone(),
            created_date: new_user.created_date,
            last_modified_by: None,
            last_modified_date: None,
        };
        self.users.insert(id, user.clone());
        self.user_authorities
            .insert(id, new_user.authorities.clone());

        UserWithAuthorities {
            user,
            authorities: new_user.authorities.clone(),
        }
    }

    /// Overwrite a row already checked by `check_update`; created_* columns are kept
    fn update_row(&mut self, user: &User) -> User {
        let (created_by, created_date) = match self.users.get(&user.id) {
            Some(stored) => (stored.created_by.clone(), stored.created_date),
            None => (user.created_by.clone(), user.created_date),
        };
        let updated = User {
            created_by,
            created_date,
            ..user.clone()
        };
        self.users.insert(user.id, updated.clone());
        updated
    }

    fn check_authorities(&self, names: &BTreeSet<String>) -> DatabaseResult<()> {
        if names.iter().all(|n| self.authorities.contains(n)) {
            Ok(())
        } else {
            Err(DatabaseError::ForeignKeyViolation(
                USER_AUTHORITY_CONSTRAINT.to_string(),
            ))
        }
    }
}

/// User store kept in process memory
#[derive(Clone)]
pub struct InMemoryUserStore {
    tables: Arc<Mutex<UserTables>>,
}

impl InMemoryUserStore {
    /// Create an empty store seeded with the known authorities
    pub fn new() -> Self {
        let tables = UserTables {
            next_id: 1,
            users: BTreeMap::new(),
            user_authorities: BTreeMap::new(),
            authorities: Authority::ALL
                .iter()
                .map(|a| a.as_str().to_string())
                .collect(),
        };
        Self {
            tables: Arc::new(Mutex::new(tables)),
        }
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn count(&self) -> DatabaseResult<i64> {
        Ok(self.tables.lock().await.users.len() as i64)
    }

    async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_one_by_login(&self, login: &str) -> DatabaseResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.find(|u| u.login == login).cloned())
    }

    async fn find_one_by_email_ignore_case(&self, email: &str) -> DatabaseResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .find(|u| same_email(u.email.as_deref(), Some(email)))
            .cloned())
    }

    async fn find_one_by_activation_key(&self, key: &str) -> DatabaseResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .find(|u| u.activation_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_one_by_reset_key(&self, key: &str) -> DatabaseResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.find(|u| u.reset_key.as_deref() == Some(key)).cloned())
    }

    async fn find_one_with_authorities_by_login(
        &self,
        login: &str,
    ) -> DatabaseResult<Option<UserWithAuthorities>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .find(|u| u.login == login)
            .map(|u| tables.with_authorities(u)))
    }

    async fn find_one_with_authorities_by_email_ignore_case(
        &self,
        email: &str,
    ) -> DatabaseResult<Option<UserWithAuthorities>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .find(|u| same_email(u.email.as_deref(), Some(email)))
            .map(|u| tables.with_authorities(u)))
    }

    async fn find_one_with_authorities_by_id(
        &self,
        id: i64,
    ) -> DatabaseResult<Option<UserWithAuthorities>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(&id).map(|u| tables.with_authorities(u)))
    }

    async fn find_all(&self, page: &PageRequest) -> DatabaseResult<Page<UserWithAuthorities>> {
        let tables = self.tables.lock().await;
        let all = tables
            .users
            .values()
            .map(|u| tables.with_authorities(u))
            .collect();
        Ok(Page::from_all(all, page))
    }

    async fn find_all_activated(&self, page: &PageRequest) -> DatabaseResult<Page<User>> {
        let tables = self.tables.lock().await;
        let all = tables
            .users
            .values()
            .filter(|u| u.activated)
            .cloned()
            .collect();
        Ok(Page::from_all(all, page))
    }

    async fn find_all_not_activated_created_before(
        &self,
        cutoff: DateTime<Utc>,
        page: &PageRequest,
    ) -> DatabaseResult<Page<User>> {
        let tables = self.tables.lock().await;
        let all = tables
            .users
            .values()
            .filter(|u| !u.activated && u.activation_key.is_some() && u.created_date < cutoff)
            .cloned()
            .collect();
        Ok(Page::from_all(all, page))
    }

    async fn insert(&self, new_user: &NewUser) -> DatabaseResult<UserWithAuthorities> {
        let mut tables = self.tables.lock().await;
        tables.check_unique(&[], &new_user.login, new_user.email.as_deref())?;
        tables.check_authorities(&new_user.authorities)?;
        Ok(tables.insert_row(new_user))
    }

    async fn replace_registrations(
        &self,
        stale_ids: &[i64],
        new_user: &NewUser,
    ) -> DatabaseResult<UserWithAuthorities> {
        let mut tables = self.tables.lock().await;
        // every check runs before the first write
        tables.check_unique(stale_ids, &new_user.login, new_user.email.as_deref())?;
        tables.check_authorities(&new_user.authorities)?;

        for id in stale_ids {
            tables.users.remove(id);
            tables.user_authorities.remove(id);
        }
        Ok(tables.insert_row(new_user))
    }

    async fn update(&self, user: &User) -> DatabaseResult<User> {
        let mut tables = self.tables.lock().await;
        tables.check_update(user)?;
        Ok(tables.update_row(user))
    }

    async fn update_with_authorities(
        &self,
        user: &User,
        authorities: &BTreeSet<String>,
    ) -> DatabaseResult<UserWithAuthorities> {
        let mut tables = self.tables.lock().await;
        tables.check_update(user)?;
        tables.check_authorities(authorities)?;

        let user = tables.update_row(user);
        tables.user_authorities.insert(user.id, authorities.clone());
        Ok(UserWithAuthorities {
            user,
            authorities: authorities.clone(),
        })
    }

    async fn delete(&self, id: i64) -> DatabaseResult<()> {
        let mut tables = self.tables.lock().await;
        tables.users.remove(&id);
        tables.user_authorities.remove(&id);
        Ok(())
    }

    async fn find_all_authorities(&self) -> DatabaseResult<Vec<AuthorityRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .authorities
            .iter()
            .map(|name| AuthorityRecord { name: name.clone() })
            .collect())
    }

    async fn find_authority(&self, name: &str) -> DatabaseResult<Option<AuthorityRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.authorities.get(name).map(|name| AuthorityRecord {
            name: name.clone(),
        }))
    }
}

#[derive(Default)]
struct LedgerTables {
    next_account_id: i64,
    next_operation_id: i64,
    accounts: BTreeMap<i64, BankAccount>,
    operations: BTreeMap<i64, Operation>,
}

impl LedgerTables {
    fn with_account(&self, operation: &Operation) -> Option<OperationWithAccount> {
        self.accounts
            .get(&operation.bank_account_id)
            .map(|account| OperationWithAccount {
                operation: operation.clone(),
                bank_account: account.clone(),
            })
    }
}

/// Ledger store kept in process memory
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    tables: Arc<Mutex<LedgerTables>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_bank_account(&self, account: &NewBankAccount) -> DatabaseResult<BankAccount> {
        let mut tables = self.tables.lock().await;
        tables.next_account_id += 1;
        let account = BankAccount {
            id: tables.next_account_id,
            name: account.name.clone(),
            balance: account.balance,
        };
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn delete_bank_account(&self, id: i64) -> DatabaseResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.operations.values().any(|o| o.bank_account_id == id) {
            return Err(DatabaseError::ForeignKeyViolation(
                OPERATION_ACCOUNT_CONSTRAINT.to_string(),
            ));
        }
        tables.accounts.remove(&id);
        Ok(())
    }

    async fn insert_operation(&self, operation: &NewOperation) -> DatabaseResult<Operation> {
        let mut tables = self.tables.lock().await;
        if !tables.accounts.contains_key(&operation.bank_account_id) {
            return Err(DatabaseError::ForeignKeyViolation(
                OPERATION_ACCOUNT_CONSTRAINT.to_string(),
            ));
        }
        tables.next_operation_id += 1;
        let operation = Operation {
            id: tables.next_operation_id,
            date: operation.date,
            description: operation.description.clone(),
            amount: operation.amount,
            bank_account_id: operation.bank_account_id,
        };
        tables.operations.insert(operation.id, operation.clone());
        Ok(operation)
    }

    async fn delete_operation(&self, id: i64) -> DatabaseResult<()> {
        self.tables.lock().await.operations.remove(&id);
        Ok(())
    }

    async fn count_operations(&self) -> DatabaseResult<i64> {
        Ok(self.tables.lock().await.operations.len() as i64)
    }

    async fn find_operation_with_account(
        &self,
        id: i64,
    ) -> DatabaseResult<Option<OperationWithAccount>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .operations
            .get(&id)
            .and_then(|o| tables.with_account(o)))
    }

    async fn find_all_operations_with_accounts(
        &self,
        page: &PageRequest,
    ) -> DatabaseResult<Page<OperationWithAccount>> {
        let tables = self.tables.lock().await;
        let all = tables
            .operations
            .values()
            .filter_map(|o| tables.with_account(o))
            .collect();
        Ok(Page::from_all(all, page))
    }

    async fn find_operations_by_account(
        &self,
        bank_account_id: i64,
    ) -> DatabaseResult<Vec<Operation>> {
        let tables = self.tables.lock().await;
        let mut operations: Vec<Operation> = tables
            .operations
            .values()
            .filter(|o| o.bank_account_id == bank_account_id)
            .cloned()
            .collect();
        operations.sort_by_key(|o| (o.date, o.id));
        Ok(operations)
    }
}
