//! State transitions of a will, evaluated against an explicit `now`.
//!
//! Every mutator checks its guard before touching the record, so a rejected
//! transition leaves the record exactly as it was.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::distribution::plan_legs;
use super::schedule::{grace_expiry, hard_deadline, reminders_elapsed};
use super::validation::{validate_for_deploy, validate_letter};
use super::{DistributionLeg, ExecutionTrigger, LegStatus, WillRecord, WillStatus, WillTerms};
use crate::error::{EngineError, EngineResult, ValidationIssue};
use crate::executor::{RetryPolicy, TransferOutcome};

/// What a sweep at a given instant should do with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    Nothing,
    Remind { reminders_due: u32 },
    MissDeadline,
    Execute,
    RetryLegs,
}

impl WillRecord {
    pub fn evaluate_sweep(&self, now: DateTime<Utc>) -> SweepAction {
        match self.status {
            WillStatus::Draft => SweepAction::Nothing,
            WillStatus::Active => {
                if now >= hard_deadline(self) {
                    return SweepAction::MissDeadline;
                }
                let reminders_due = reminders_elapsed(self, now);
                if reminders_due > self.reminders_sent {
                    SweepAction::Remind { reminders_due }
                } else {
                    SweepAction::Nothing
                }
            }
            WillStatus::MissedCheckIn => match self.missed_at {
                Some(missed_at) if now >= grace_expiry(missed_at) => SweepAction::Execute,
                _ => SweepAction::Nothing,
            },
            WillStatus::Executed => {
                if self.legs.iter().any(|leg| leg.is_due(now)) {
                    SweepAction::RetryLegs
                } else {
                    SweepAction::Nothing
                }
            }
        }
    }

    pub fn replace_terms(&mut self, terms: WillTerms) -> EngineResult<()> {
        if self.status != WillStatus::Draft {
            return Err(EngineError::invalid_state(self.status, "update_draft"));
        }
        validate_letter(terms.letter.as_deref())?;

        self.beneficiaries = terms.beneficiaries;
        self.check_in_interval = terms.check_in_interval;
        self.letter = terms.letter;
        if terms.credential.is_some() {
            self.credential = terms.credential;
        }
        Ok(())
    }

    pub fn deposit(&mut self, amount: u64) -> EngineResult<()> {
        if self.status.is_terminal() {
            return Err(EngineError::invalid_state(self.status, "deposit"));
        }
        if amount == 0 {
            return Err(ValidationIssue::ZeroAmount.into());
        }
        self.total_funds = self
            .total_funds
            .checked_add(amount)
            .ok_or(ValidationIssue::FundsOverflow)?;
        Ok(())
    }

    pub fn deploy(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        if self.status != WillStatus::Draft {
            return Err(EngineError::invalid_state(self.status, "deploy"));
        }
        validate_for_deploy(self)?;

        self.status = WillStatus::Active;
        self.deployed_at = Some(now);
        self.last_check_in_at = self.last_check_in_at.max(now);
        self.reminders_sent = 0;
        Ok(())
    }

    /// Record a liveness proof. Returns `true` when this rescued a missed deadline.
    pub fn check_in(&mut self, now: DateTime<Utc>) -> EngineResult<bool> {
        let rescued = match self.status {
            WillStatus::Active => false,
            WillStatus::MissedCheckIn => true,
            status => return Err(EngineError::invalid_state(status, "check_in")),
        };

        self.status = WillStatus::Active;
        self.last_check_in_at = self.last_check_in_at.max(now);
        self.missed_at = None;
        self.reminders_sent = 0;
        Ok(rescued)
    }

    pub fn mark_reminded(&mut self, reminders_due: u32) {
        self.reminders_sent = self.reminders_sent.max(reminders_due);
    }

    pub fn miss_deadline(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        if self.status != WillStatus::Active {
            return Err(EngineError::invalid_state(self.status, "miss_deadline"));
        }
        self.status = WillStatus::MissedCheckIn;
        self.missed_at = Some(now);
        Ok(())
    }

    /// Enter `Executed`: freeze the balance into one leg per beneficiary.
    pub fn execute(&mut self, trigger: ExecutionTrigger, now: DateTime<Utc>) -> EngineResult<()> {
        match self.status {
            WillStatus::Active | WillStatus::MissedCheckIn => {}
            status => return Err(EngineError::invalid_state(status, "execute")),
        }

        self.legs = plan_legs(self.total_funds, &self.beneficiaries, now);
        self.total_funds = 0;
        self.status = WillStatus::Executed;
        self.executed_at = Some(now);
        self.execution_trigger = Some(trigger);
        Ok(())
    }

    /// Lease every due leg for one dispatch attempt and return snapshots of them.
    pub fn claim_due_legs(
        &mut self,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Vec<DistributionLeg> {
        self.legs
            .iter_mut()
            .filter(|leg| leg.is_due(now))
            .map(|leg| {
                leg.attempts += 1;
                leg.next_attempt_at = Some(now + policy.delay_for_attempt(leg.attempts));
                leg.clone()
            })
            .collect()
    }

    /// Fold an executor outcome back into the matching leg. A failure reported for
    /// an attempt that has since been superseded is dropped.
    pub fn apply_leg_outcome(
        &mut self,
        beneficiary_id: Uuid,
        attempt: u32,
        outcome: &TransferOutcome,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(leg) = self
            .legs
            .iter_mut()
            .find(|leg| leg.beneficiary_id == beneficiary_id)
        else {
            return false;
        };
        if leg.is_settled() {
            return false;
        }

        match outcome {
            TransferOutcome::Success => {
                leg.status = LegStatus::Completed;
                leg.completed_at = Some(now);
                leg.next_attempt_at = None;
                leg.last_error = None;
                true
            }
            TransferOutcome::Failed(reason) if leg.attempts == attempt => {
                leg.status = LegStatus::PendingRetry;
                leg.last_error = Some(reason.clone());
                true
            }
            TransferOutcome::Failed(_) => false,
        }
    }
}
