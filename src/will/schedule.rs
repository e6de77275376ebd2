//! Deadline arithmetic. Every instant here is derived from stored timestamps, so a
//! sweep that runs late computes the same answer as one that runs on time.

use chrono::{DateTime, Duration, Months, Utc};

use super::{WillRecord, WillStatus, GRACE_DAYS, HARD_DEADLINE_MONTHS};

fn add_months(from: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    from.checked_add_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Instant at which an unattended will misses its check-in.
pub fn hard_deadline(record: &WillRecord) -> DateTime<Utc> {
    add_months(record.last_check_in_at, HARD_DEADLINE_MONTHS)
}

pub fn grace_expiry(missed_at: DateTime<Utc>) -> DateTime<Utc> {
    missed_at
        .checked_add_signed(Duration::days(GRACE_DAYS))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn reminder_at(record: &WillRecord, ordinal: u32) -> DateTime<Utc> {
    let months = record.check_in_interval.months().saturating_mul(ordinal);
    add_months(record.last_check_in_at, months)
}

/// Next reminder owed to the owner in the current check-in cycle, if any.
/// Reminders that would land on or after the hard deadline are superseded by it.
pub fn next_reminder_at(record: &WillRecord) -> Option<DateTime<Utc>> {
    let at = reminder_at(record, record.reminders_sent.saturating_add(1));
    (at < hard_deadline(record)).then_some(at)
}

/// Number of reminder instants in the current cycle that are at or before `now`.
pub fn reminders_elapsed(record: &WillRecord, now: DateTime<Utc>) -> u32 {
    let deadline = hard_deadline(record);
    let mut count = record.reminders_sent;
    loop {
        let at = reminder_at(record, count + 1);
        if at > now || at >= deadline {
            return count;
        }
        count += 1;
    }
}

/// Earliest instant at which `sweep` has work to do for this record.
pub fn next_due_at(record: &WillRecord) -> Option<DateTime<Utc>> {
    match record.status {
        WillStatus::Draft => None,
        WillStatus::Active => {
            let deadline = hard_deadline(record);
            Some(next_reminder_at(record).map_or(deadline, |r| r.min(deadline)))
        }
        WillStatus::MissedCheckIn => record.missed_at.map(grace_expiry),
        WillStatus::Executed => record
            .pending_legs()
            .map(|leg| leg.next_attempt_at.unwrap_or(DateTime::<Utc>::MIN_UTC))
            .min(),
    }
}
