//! Account notification mail
//!
//! The account service only decides *which* mail to send; delivery goes
//! through a [`MailTransport`]. Delivery failures are logged here and never
//! reach the caller.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::User;

pub const ACTIVATION_TEMPLATE: &str = "mail/activationEmail";
pub const CREATION_TEMPLATE: &str = "mail/creationEmail";
pub const PASSWORD_RESET_TEMPLATE: &str = "mail/passwordResetEmail";

pub const ACTIVATION_TITLE_KEY: &str = "email.activation.title";
pub const RESET_TITLE_KEY: &str = "email.reset.title";

/// Everything a transport needs to render and deliver one account mail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailMessage {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub subject_key: String,
    pub template: String,
    pub lang_key: String,
    pub login: String,
    pub base_url: String,
    pub activation_key: Option<String>,
    pub reset_key: Option<String>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, message: &MailMessage) -> anyhow::Result<()>;
}

/// Transport that only records outgoing mail in the log
#[derive(Debug, Clone, Default)]
pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn deliver(&self, message: &MailMessage) -> anyhow::Result<()> {
        info!(
            mail_id = %message.id,
            to = %message.to,
            template = %message.template,
            subject_key = %message.subject_key,
            "Mail dispatched"
        );
        Ok(())
    }
}

/// Builds account mails and hands them to the configured transport
#[derive(Clone)]
pub struct MailService {
    transport: Arc<dyn MailTransport>,
    from: String,
    base_url: String,
}

impl MailService {
    pub fn new(transport: Arc<dyn MailTransport>, from: String, base_url: String) -> Self {
        Self {
            transport,
            from,
            base_url,
        }
    }

    pub async fn send_activation_email(&self, user: &User) {
        debug!("Sending activation email to '{}'", user.login);
        self.send_email_from_template(user, ACTIVATION_TEMPLATE, ACTIVATION_TITLE_KEY)
            .await;
    }

    pub async fn send_creation_email(&self, user: &User) {
        debug!("Sending creation email to '{}'", user.login);
        self.send_email_from_template(user, CREATION_TEMPLATE, ACTIVATION_TITLE_KEY)
            .await;
    }

    pub async fn send_password_reset_mail(&self, user: &User) {
        debug!("Sending password reset email to '{}'", user.login);
        self.send_email_from_template(user, PASSWORD_RESET_TEMPLATE, RESET_TITLE_KEY)
            .await;
    }

    async fn send_email_from_template(&self, user: &User, template: &str, subject_key: &str) {
        let Some(to) = user.email.clone() else {
            debug!("Email doesn't exist for user '{}'", user.login);
            return;
        };

        let message = MailMessage {
            id: Uuid::new_v4(),
            from: self.from.clone(),
            to,
            subject_key: subject_key.to_string(),
            template: template.to_string(),
            lang_key: user.lang_key.clone(),
            login: user.login.clone(),
            base_url: self.base_url.clone(),
            activation_key: user.activation_key.clone(),
            reset_key: user.reset_key.clone(),
        };

        if let Err(e) = self.transport.deliver(&message).await {
            warn!("Email could not be sent to user '{}': {}", message.to, e);
        }
    }
}
