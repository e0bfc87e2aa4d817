//! Bank account and operation models
//!
//! Amounts are integer minor currency units (cents).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct BankAccount {
    pub id: i64,
    pub name: String,
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBankAccount {
    pub name: String,
    pub balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Operation {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub description: Option<String>,
    pub amount: i64,
    pub bank_account_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOperation {
    pub date: DateTime<Utc>,
    pub description: Option<String>,
    pub amount: i64,
    pub bank_account_id: i64,
}

/// An operation with its owning account loaded in the same query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationWithAccount {
    #[serde(flatten)]
    pub operation: Operation,
    pub bank_account: BankAccount,
}
