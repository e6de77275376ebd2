use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use super::{Beneficiary, WillRecord, MAX_BENEFICIARIES, MAX_LETTER_CHARS};
use crate::error::ValidationIssue;

pub const MIN_PASSWORD_CHARS: usize = 8;

fn wallet_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static wallet regex"))
}

pub fn is_wallet_address(candidate: &str) -> bool {
    wallet_pattern().is_match(candidate)
}

/// Beneficiary composition rules enforced before a will leaves draft.
pub fn validate_beneficiaries(beneficiaries: &[Beneficiary]) -> Result<(), ValidationIssue> {
    if beneficiaries.is_empty() {
        return Err(ValidationIssue::NoBeneficiaries);
    }

    if beneficiaries.len() > MAX_BENEFICIARIES {
        return Err(ValidationIssue::TooManyBeneficiaries {
            count: beneficiaries.len(),
            max: MAX_BENEFICIARIES,
        });
    }

    let mut seen = HashSet::with_capacity(beneficiaries.len());
    for beneficiary in beneficiaries {
        if beneficiary.percentage_share == 0 {
            return Err(ValidationIssue::ZeroShare(beneficiary.id));
        }
        if !seen.insert(beneficiary.wallet_address.as_str()) {
            return Err(ValidationIssue::DuplicateWallet(
                beneficiary.wallet_address.to_string(),
            ));
        }
    }

    let total: u64 = beneficiaries
        .iter()
        .map(|b| u64::from(b.percentage_share))
        .sum();
    if total != 100 {
        return Err(ValidationIssue::ShareSumMismatch { total });
    }

    Ok(())
}

pub fn validate_letter(letter: Option<&str>) -> Result<(), ValidationIssue> {
    let len = letter.map_or(0, |l| l.chars().count());
    if len > MAX_LETTER_CHARS {
        return Err(ValidationIssue::LetterTooLong {
            len,
            max: MAX_LETTER_CHARS,
        });
    }
    Ok(())
}

pub fn validate_password(password: &str, confirmation: &str) -> Result<(), ValidationIssue> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ValidationIssue::PasswordTooShort {
            min: MIN_PASSWORD_CHARS,
        });
    }
    if password != confirmation {
        return Err(ValidationIssue::PasswordMismatch);
    }
    Ok(())
}

/// Full re-validation of a draft at deploy time.
pub fn validate_for_deploy(record: &WillRecord) -> Result<(), ValidationIssue> {
    validate_beneficiaries(&record.beneficiaries)?;
    validate_letter(record.letter.as_deref())?;
    if record.credential.is_none() {
        return Err(ValidationIssue::MissingOverridePassword);
    }
    Ok(())
}
