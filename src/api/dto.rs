use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{OverridePassword, WillDraft};
use crate::error::ValidationIssue;
use crate::will::schedule::{grace_expiry, hard_deadline, next_reminder_at};
use crate::will::{
    Beneficiary, CheckInInterval, DistributionLeg, ExecutionTrigger, WalletAddress, WillId,
    WillRecord, WillStatus,
};

/// Success envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success",
            message: None,
            data,
        }
    }

    pub fn with_message(message: &'static str, data: T) -> Self {
        Self {
            status: "success",
            message: Some(message),
            data,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BeneficiaryInput {
    pub wallet_address: String,
    pub percentage_share: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl TryFrom<BeneficiaryInput> for Beneficiary {
    type Error = ValidationIssue;

    fn try_from(input: BeneficiaryInput) -> Result<Self, Self::Error> {
        Ok(Beneficiary {
            id: Uuid::new_v4(),
            wallet_address: WalletAddress::parse(&input.wallet_address)?,
            percentage_share: input.percentage_share,
            name: input.name.filter(|n| !n.trim().is_empty()),
            email: input.email.filter(|e| !e.trim().is_empty()),
        })
    }
}

fn default_interval() -> u32 {
    CheckInInterval::default().months()
}

/// Body of both draft creation and draft replacement.
#[derive(Debug, Deserialize)]
pub struct WillDraftRequest {
    #[serde(default)]
    pub beneficiaries: Vec<BeneficiaryInput>,
    #[serde(default = "default_interval")]
    pub check_in_interval_months: u32,
    #[serde(default)]
    pub letter: Option<String>,
    #[serde(default)]
    pub override_password: Option<String>,
    #[serde(default)]
    pub confirm_password: Option<String>,
}

impl TryFrom<WillDraftRequest> for WillDraft {
    type Error = ValidationIssue;

    fn try_from(request: WillDraftRequest) -> Result<Self, Self::Error> {
        let beneficiaries = request
            .beneficiaries
            .into_iter()
            .map(Beneficiary::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let override_password = request.override_password.map(|password| OverridePassword {
            password,
            confirmation: request.confirm_password.unwrap_or_default(),
        });

        Ok(WillDraft {
            beneficiaries,
            check_in_interval: CheckInInterval::try_from(request.check_in_interval_months)?,
            letter: request.letter.filter(|l| !l.trim().is_empty()),
            override_password,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LetterResponse {
    pub will_id: WillId,
    pub letter: Option<String>,
}

/// Public view of a will. Credential material never leaves the engine.
#[derive(Debug, Serialize)]
pub struct WillView {
    pub id: WillId,
    pub owner: WalletAddress,
    pub status: WillStatus,
    pub beneficiaries: Vec<Beneficiary>,
    pub check_in_interval_months: u32,
    pub total_funds: u64,
    pub has_override_password: bool,
    pub has_letter: bool,
    pub created_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub last_check_in_at: DateTime<Utc>,
    pub hard_deadline_at: Option<DateTime<Utc>>,
    pub next_reminder_at: Option<DateTime<Utc>>,
    pub missed_at: Option<DateTime<Utc>>,
    pub grace_expires_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_trigger: Option<ExecutionTrigger>,
    pub legs: Vec<DistributionLeg>,
    pub version: u64,
}

impl From<&WillRecord> for WillView {
    fn from(record: &WillRecord) -> Self {
        let active = record.status == WillStatus::Active;
        Self {
            id: record.id,
            owner: record.owner.clone(),
            status: record.status,
            beneficiaries: record.beneficiaries.clone(),
            check_in_interval_months: record.check_in_interval.months(),
            total_funds: record.total_funds,
            has_override_password: record.credential.is_some(),
            has_letter: record.letter.is_some(),
            created_at: record.created_at,
            deployed_at: record.deployed_at,
            last_check_in_at: record.last_check_in_at,
            hard_deadline_at: active.then(|| hard_deadline(record)),
            next_reminder_at: if active { next_reminder_at(record) } else { None },
            missed_at: record.missed_at,
            grace_expires_at: record.missed_at.map(grace_expiry),
            executed_at: record.executed_at,
            execution_trigger: record.execution_trigger,
            legs: record.legs.clone(),
            version: record.version,
        }
    }
}

impl From<WillRecord> for WillView {
    fn from(record: WillRecord) -> Self {
        WillView::from(&record)
    }
}
