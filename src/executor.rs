//! Distribution executor: the capability that actually moves funds to a
//! beneficiary once a will is executed.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::will::{WalletAddress, WillId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub will_id: WillId,
    pub beneficiary_id: Uuid,
    pub wallet_address: WalletAddress,
    pub amount: u64,
    pub attempt: u32,
}

impl TransferRequest {
    /// Stable across attempts so the executor can deduplicate redelivery.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.will_id, self.beneficiary_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    Failed(String),
}

#[async_trait]
pub trait DistributionExecutor: Send + Sync {
    async fn transfer(&self, request: &TransferRequest) -> TransferOutcome;
}

/// Backoff between dispatch attempts of a failed leg.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_secs: 60,
            max_delay_secs: 6 * 3600,
        }
    }
}

impl RetryPolicy {
    /// Exponential delay for the given 1-based attempt, capped at the maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .initial_delay_secs
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_secs)
            .max(1);
        Duration::seconds(delay.min(u64::from(u32::MAX)) as i64)
    }
}

/// Posts transfer instructions to a payout service over HTTP.
pub struct HttpDistributionExecutor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDistributionExecutor {
    pub fn new(endpoint: impl Into<String>, timeout: StdDuration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl DistributionExecutor for HttpDistributionExecutor {
    async fn transfer(&self, request: &TransferRequest) -> TransferOutcome {
        let key = request.idempotency_key();
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Ok(value) = HeaderValue::from_str(&key) {
            builder = builder.header("Idempotency-Key", value);
        }

        match builder.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(
                    will_id = %request.will_id,
                    beneficiary_id = %request.beneficiary_id,
                    amount = request.amount,
                    "Transfer accepted by executor"
                );
                TransferOutcome::Success
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(
                    will_id = %request.will_id,
                    beneficiary_id = %request.beneficiary_id,
                    %status,
                    "Transfer rejected by executor"
                );
                TransferOutcome::Failed(format!("executor responded {status}: {body}"))
            }
            Err(e) => {
                warn!(
                    will_id = %request.will_id,
                    beneficiary_id = %request.beneficiary_id,
                    error = %e,
                    "Transfer request failed"
                );
                TransferOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            initial_delay_secs: 10,
            max_delay_secs: 45,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::seconds(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::seconds(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::seconds(40));
        assert_eq!(policy.delay_for_attempt(4), Duration::seconds(45));
        assert_eq!(policy.delay_for_attempt(200), Duration::seconds(45));
    }

    #[test]
    fn test_backoff_never_zero() {
        let policy = RetryPolicy {
            initial_delay_secs: 0,
            max_delay_secs: 0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::seconds(1));
    }
}
