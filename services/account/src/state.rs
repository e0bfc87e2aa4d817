//! Application state shared across handlers

use std::sync::Arc;

use crate::{mail::MailService, repositories::LedgerStore, service::AccountService};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub account_service: AccountService,
    pub mail_service: MailService,
    pub ledger: Arc<dyn LedgerStore>,
}
