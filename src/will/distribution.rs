use chrono::{DateTime, Utc};

use super::{Beneficiary, DistributionLeg, LegStatus};

/// Split `total` by percentage shares. Each amount is floored except the last,
/// which takes the remainder so the full balance is always allocated.
pub fn allocate(total: u64, shares: &[u32]) -> Vec<u64> {
    let mut amounts = Vec::with_capacity(shares.len());
    let mut allocated: u64 = 0;

    for (index, share) in shares.iter().enumerate() {
        let amount = if index + 1 == shares.len() {
            total.saturating_sub(allocated)
        } else {
            (u128::from(total) * u128::from(*share) / 100) as u64
        };
        allocated = allocated.saturating_add(amount);
        amounts.push(amount);
    }

    amounts
}

/// Build one leg per beneficiary, in list order. A leg with nothing to send is
/// settled on the spot and never reaches the executor.
pub fn plan_legs(
    total: u64,
    beneficiaries: &[Beneficiary],
    now: DateTime<Utc>,
) -> Vec<DistributionLeg> {
    let shares: Vec<u32> = beneficiaries.iter().map(|b| b.percentage_share).collect();

    beneficiaries
        .iter()
        .zip(allocate(total, &shares))
        .map(|(beneficiary, amount)| {
            let settled = amount == 0;
            DistributionLeg {
                beneficiary_id: beneficiary.id,
                wallet_address: beneficiary.wallet_address.clone(),
                amount,
                status: if settled {
                    LegStatus::Completed
                } else {
                    LegStatus::Pending
                },
                attempts: 0,
                next_attempt_at: (!settled).then_some(now),
                last_error: None,
                completed_at: settled.then_some(now),
            }
        })
        .collect()
}
