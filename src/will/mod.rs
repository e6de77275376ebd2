//! Will records and the proof-of-life lifecycle.
//!
//! A [`WillRecord`] moves through `Draft -> Active -> MissedCheckIn -> Executed`.
//! The transitions themselves are pure functions over a record and an instant
//! (see [`lifecycle`]); persistence, notification and fund movement are layered
//! on top by the engine.

pub mod distribution;
pub mod lifecycle;
pub mod schedule;
pub mod validation;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credential::OverrideCredential;
use crate::error::ValidationIssue;

/// Absolute ceiling between check-ins, independent of the configured interval.
pub const HARD_DEADLINE_MONTHS: u32 = 12;

/// Window after a missed deadline before the will executes.
pub const GRACE_DAYS: i64 = 30;

pub const MAX_BENEFICIARIES: usize = 10;

pub const MAX_LETTER_CHARS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WillId(pub Uuid);

impl WillId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WillId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for WillId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// An EVM-style wallet address, normalized to lower case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(raw: &str) -> Result<Self, ValidationIssue> {
        let trimmed = raw.trim();
        if !validation::is_wallet_address(trimmed) {
            return Err(ValidationIssue::InvalidWalletAddress(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = ValidationIssue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allowed check-in cadences. Only affects reminders; the hard deadline is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum CheckInInterval {
    Quarterly,
    Yearly,
    Biennial,
}

impl CheckInInterval {
    pub fn months(self) -> u32 {
        match self {
            CheckInInterval::Quarterly => 3,
            CheckInInterval::Yearly => 12,
            CheckInInterval::Biennial => 24,
        }
    }
}

impl Default for CheckInInterval {
    fn default() -> Self {
        Self::Yearly
    }
}

impl TryFrom<u32> for CheckInInterval {
    type Error = ValidationIssue;

    fn try_from(months: u32) -> Result<Self, Self::Error> {
        match months {
            3 => Ok(Self::Quarterly),
            12 => Ok(Self::Yearly),
            24 => Ok(Self::Biennial),
            other => Err(ValidationIssue::UnsupportedInterval(other)),
        }
    }
}

impl From<CheckInInterval> for u32 {
    fn from(value: CheckInInterval) -> Self {
        value.months()
    }
}

/// Lifecycle status. Declaration order is the forward order of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WillStatus {
    Draft,
    Active,
    MissedCheckIn,
    Executed,
}

impl WillStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WillStatus::Draft => "draft",
            WillStatus::Active => "active",
            WillStatus::MissedCheckIn => "missed_check_in",
            WillStatus::Executed => "executed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == WillStatus::Executed
    }
}

impl fmt::Display for WillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WillStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WillStatus::Draft),
            "active" => Ok(WillStatus::Active),
            "missed_check_in" => Ok(WillStatus::MissedCheckIn),
            "executed" => Ok(WillStatus::Executed),
            other => Err(format!("unknown will status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: Uuid,
    pub wallet_address: WalletAddress,
    pub percentage_share: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Beneficiary {
    pub fn new(wallet_address: WalletAddress, percentage_share: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_address,
            percentage_share,
            name: None,
            email: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTrigger {
    GracePeriodElapsed,
    Override,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    /// Computed at execution, never dispatched.
    Pending,
    /// Dispatched at least once and failed; due again at `next_attempt_at`.
    PendingRetry,
    Completed,
}

/// One beneficiary's transfer within an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionLeg {
    pub beneficiary_id: Uuid,
    pub wallet_address: WalletAddress,
    pub amount: u64,
    pub status: LegStatus,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DistributionLeg {
    pub fn is_settled(&self) -> bool {
        self.status == LegStatus::Completed
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_settled() && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Owner-editable terms of a will, supplied at creation and while in draft.
#[derive(Debug, Clone, Default)]
pub struct WillTerms {
    pub beneficiaries: Vec<Beneficiary>,
    pub check_in_interval: CheckInInterval,
    pub letter: Option<String>,
    pub credential: Option<OverrideCredential>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WillRecord {
    pub id: WillId,
    pub owner: WalletAddress,
    pub beneficiaries: Vec<Beneficiary>,
    pub credential: Option<OverrideCredential>,
    pub check_in_interval: CheckInInterval,
    pub letter: Option<String>,
    pub status: WillStatus,
    pub total_funds: u64,
    pub created_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub last_check_in_at: DateTime<Utc>,
    pub missed_at: Option<DateTime<Utc>>,
    pub reminders_sent: u32,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_trigger: Option<ExecutionTrigger>,
    pub legs: Vec<DistributionLeg>,
    pub version: u64,
}

impl WillRecord {
    pub fn new_draft(owner: WalletAddress, terms: WillTerms, now: DateTime<Utc>) -> Self {
        Self {
            id: WillId::new(),
            owner,
            beneficiaries: terms.beneficiaries,
            credential: terms.credential,
            check_in_interval: terms.check_in_interval,
            letter: terms.letter,
            status: WillStatus::Draft,
            total_funds: 0,
            created_at: now,
            deployed_at: None,
            last_check_in_at: now,
            missed_at: None,
            reminders_sent: 0,
            executed_at: None,
            execution_trigger: None,
            legs: Vec::new(),
            version: 0,
        }
    }

    pub fn is_owned_by(&self, identity: &WalletAddress) -> bool {
        &self.owner == identity
    }

    pub fn beneficiary_by_wallet(&self, wallet: &WalletAddress) -> Option<&Beneficiary> {
        self.beneficiaries
            .iter()
            .find(|b| &b.wallet_address == wallet)
    }

    pub fn pending_legs(&self) -> impl Iterator<Item = &DistributionLeg> {
        self.legs.iter().filter(|leg| !leg.is_settled())
    }

    pub fn is_fully_distributed(&self) -> bool {
        self.status == WillStatus::Executed && self.legs.iter().all(DistributionLeg::is_settled)
    }
}
