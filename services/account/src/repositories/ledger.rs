//! Bank account and operation repository backed by PostgreSQL

use async_trait::async_trait;
use common::error::DatabaseResult;
use common::pagination::{Page, PageRequest};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::LedgerStore;
use crate::models::{
    BankAccount, NewBankAccount, NewOperation, Operation, OperationWithAccount,
};

const OPERATION_WITH_ACCOUNT_SELECT: &str = r#"
    SELECT o.id, o.date, o.description, o.amount, o.bank_account_id,
           b.name AS account_name, b.balance AS account_balance
    FROM operation o
    JOIN bank_account b ON b.id = o.bank_account_id
"#;

fn operation_with_account(row: &PgRow) -> OperationWithAccount {
    let bank_account_id: i64 = row.get("bank_account_id");
    OperationWithAccount {
        operation: Operation {
            id: row.get("id"),
            date: row.get("date"),
            description: row.get("description"),
            amount: row.get("amount"),
            bank_account_id,
        },
        bank_account: BankAccount {
            id: bank_account_id,
            name: row.get("account_name"),
            balance: row.get("account_balance"),
        },
    }
}

/// Ledger repository
#[derive(Clone)]
pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerRepository {
    async fn insert_bank_account(&self, account: &NewBankAccount) -> DatabaseResult<BankAccount> {
        let account = sqlx::query_as::<_, BankAccount>(
            r#"
            INSERT INTO bank_account (name, balance)
            VALUES ($1, $2)
            RETURNING id, name, balance
            "#,
        )
        .bind(&account.name)
        .bind(account.balance)
        .fetch_one(&self.pool)
        .await?;
        Ok(account)
    }

    async fn delete_bank_account(&self, id: i64) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM bank_account WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_operation(&self, operation: &NewOperation) -> DatabaseResult<Operation> {
        let operation = sqlx::query_as::<_, Operation>(
            r#"
            INSERT INTO operation (date, description, amount, bank_account_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, date, description, amount, bank_account_id
            "#,
        )
        .bind(operation.date)
        .bind(&operation.description)
        .bind(operation.amount)
        .bind(operation.bank_account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(operation)
    }

    async fn delete_operation(&self, id: i64) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM operation WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_operations(&self) -> DatabaseResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM operation")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn find_operation_with_account(
        &self,
        id: i64,
    ) -> DatabaseResult<Option<OperationWithAccount>> {
        let sql = format!("{OPERATION_WITH_ACCOUNT_SELECT} WHERE o.id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(operation_with_account))
    }

    async fn find_all_operations_with_accounts(
        &self,
        page: &PageRequest,
    ) -> DatabaseResult<Page<OperationWithAccount>> {
        let sql = format!("{OPERATION_WITH_ACCOUNT_SELECT} ORDER BY o.id LIMIT $1 OFFSET $2");
        let rows = sqlx::query(&sql)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let total = self.count_operations().await?;
        Ok(Page::new(
            rows.iter().map(operation_with_account).collect(),
            page,
            total,
        ))
    }

    async fn find_operations_by_account(
        &self,
        bank_account_id: i64,
    ) -> DatabaseResult<Vec<Operation>> {
        let operations = sqlx::query_as::<_, Operation>(
            r#"
            SELECT id, date, description, amount, bank_account_id
            FROM operation
            WHERE bank_account_id = $1
            ORDER BY date, id
            "#,
        )
        .bind(bank_account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(operations)
    }
}
