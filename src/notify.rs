//! Outbound notifications for will lifecycle events.
//!
//! Delivery is best effort: the engine logs a failed notification and moves on,
//! the state transition that caused it is already committed.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::will::{WalletAddress, WillId, WillRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CheckInReminder,
    DeadlineMissed,
    CheckInRestored,
    ExecutedAfterGrace,
    ExecutedByOverride,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CheckInReminder => "check_in_reminder",
            EventKind::DeadlineMissed => "deadline_missed",
            EventKind::CheckInRestored => "check_in_restored",
            EventKind::ExecutedAfterGrace => "executed_after_grace",
            EventKind::ExecutedByOverride => "executed_by_override",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Recipient {
    Owner {
        wallet_address: WalletAddress,
    },
    Beneficiary {
        beneficiary_id: Uuid,
        wallet_address: WalletAddress,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
    },
}

impl Recipient {
    pub fn owner_of(record: &WillRecord) -> Self {
        Recipient::Owner {
            wallet_address: record.owner.clone(),
        }
    }

    pub fn beneficiaries_of(record: &WillRecord) -> impl Iterator<Item = Recipient> + '_ {
        record.beneficiaries.iter().map(|b| Recipient::Beneficiary {
            beneficiary_id: b.id,
            wallet_address: b.wallet_address.clone(),
            email: b.email.clone(),
        })
    }

    /// Owner first, then every beneficiary in list order.
    pub fn everyone(record: &WillRecord) -> Vec<Recipient> {
        std::iter::once(Self::owner_of(record))
            .chain(Self::beneficiaries_of(record))
            .collect()
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        will_id: WillId,
        kind: EventKind,
        recipients: &[Recipient],
    ) -> Result<(), NotifyError>;
}

/// Emits each notification as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn notify(
        &self,
        will_id: WillId,
        kind: EventKind,
        recipients: &[Recipient],
    ) -> Result<(), NotifyError> {
        info!(
            %will_id,
            event = kind.as_str(),
            recipients = recipients.len(),
            "Will notification"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    will_id: WillId,
    event: EventKind,
    recipients: &'a [Recipient],
    occurred_at: DateTime<Utc>,
}

/// Posts notifications as JSON to an external delivery service.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(
        &self,
        will_id: WillId,
        kind: EventKind,
        recipients: &[Recipient],
    ) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            will_id,
            event: kind,
            recipients,
            occurred_at: Utc::now(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Delivery(format!(
                "webhook responded {}",
                response.status()
            )));
        }
        Ok(())
    }
}
