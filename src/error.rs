use thiserror::Error;
use uuid::Uuid;

use crate::credential::CredentialError;
use crate::store::StoreError;
use crate::will::{WillId, WillStatus};

/// Reasons a will draft cannot be deployed or an input is rejected outright.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("a will needs at least one beneficiary")]
    NoBeneficiaries,

    #[error("a will supports at most {max} beneficiaries, got {count}")]
    TooManyBeneficiaries { count: usize, max: usize },

    #[error("beneficiary shares must sum to 100, got {total}")]
    ShareSumMismatch { total: u64 },

    #[error("beneficiary {0} has a zero share")]
    ZeroShare(Uuid),

    #[error("wallet address {0} appears more than once")]
    DuplicateWallet(String),

    #[error("invalid wallet address: {0}")]
    InvalidWalletAddress(String),

    #[error("check-in interval of {0} months is not supported")]
    UnsupportedInterval(u32),

    #[error("an override password must be set before deployment")]
    MissingOverridePassword,

    #[error("override password and confirmation do not match")]
    PasswordMismatch,

    #[error("override password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("letter is {len} characters, limit is {max}")]
    LetterTooLong { len: usize, max: usize },

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("deposit would overflow the will balance")]
    FundsOverflow,
}

/// Typed failures of the proof-of-life engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationIssue),

    #[error("caller is not authorized for this will")]
    Unauthorized,

    #[error("operation `{operation}` is not allowed while the will is {status}")]
    InvalidState {
        status: WillStatus,
        operation: &'static str,
    },

    #[error("invalid credential")]
    InvalidCredential,

    #[error("concurrent update on will {0}, retry with fresh state")]
    ConcurrencyConflict(WillId),

    #[error("distribution to beneficiary {beneficiary_id} of will {will_id} failed: {reason}")]
    DistributionFailure {
        will_id: WillId,
        beneficiary_id: Uuid,
        reason: String,
    },

    #[error("will {0} not found")]
    NotFound(WillId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl EngineError {
    pub(crate) fn invalid_state(status: WillStatus, operation: &'static str) -> Self {
        Self::InvalidState { status, operation }
    }

    /// Whether the caller may retry the whole operation with fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
