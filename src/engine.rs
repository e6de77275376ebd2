//! Proof-of-life engine.
//!
//! Every mutation runs as read-modify-write against the store: load the record,
//! evaluate the transition against a fresh `now`, and commit only if the stored
//! version is unchanged. A lost race re-runs the whole evaluation, so guards are
//! never applied to stale state. Notification and fund movement happen after the
//! commit that authorized them, and only the committing caller performs them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::credential::{CredentialError, OverrideCredential, DEFAULT_ITERATIONS};
use crate::error::{EngineError, EngineResult};
use crate::executor::{DistributionExecutor, RetryPolicy, TransferOutcome, TransferRequest};
use crate::identity::{Caller, IdentityProvider};
use crate::notify::{EventKind, NotificationSink, Recipient};
use crate::store::WillStore;
use crate::will::lifecycle::SweepAction;
use crate::will::validation::{validate_letter, validate_password};
use crate::will::{
    Beneficiary, CheckInInterval, DistributionLeg, ExecutionTrigger, WillId, WillRecord,
    WillStatus, WillTerms,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Optimistic-concurrency attempts before surfacing `ConcurrencyConflict`.
    pub max_cas_attempts: u32,
    pub pbkdf2_iterations: u32,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cas_attempts: 5,
            pbkdf2_iterations: DEFAULT_ITERATIONS,
            retry: RetryPolicy::default(),
        }
    }
}

/// New override secret as typed by the owner.
#[derive(Debug, Clone)]
pub struct OverridePassword {
    pub password: String,
    pub confirmation: String,
}

/// Owner-supplied will contents, before the override secret is hashed.
#[derive(Debug, Clone, Default)]
pub struct WillDraft {
    pub beneficiaries: Vec<Beneficiary>,
    pub check_in_interval: CheckInInterval,
    pub letter: Option<String>,
    pub override_password: Option<OverridePassword>,
}

#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub action: SweepAction,
    pub record: WillRecord,
    pub changed: bool,
}

struct Committed<T> {
    record: WillRecord,
    value: T,
    changed: bool,
}

pub struct ProofOfLifeEngine {
    store: Arc<dyn WillStore>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn NotificationSink>,
    executor: Arc<dyn DistributionExecutor>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    deliveries: TaskTracker,
}

impl ProofOfLifeEngine {
    pub fn new(
        store: Arc<dyn WillStore>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn NotificationSink>,
        executor: Arc<dyn DistributionExecutor>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            identity,
            notifier,
            executor,
            clock,
            config,
            deliveries: TaskTracker::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn store(&self) -> &Arc<dyn WillStore> {
        &self.store
    }

    /// Wait for every notification handed off so far to finish delivering.
    pub async fn flush_notifications(&self) {
        self.deliveries.close();
        self.deliveries.wait().await;
        self.deliveries.reopen();
    }

    // ==================== Owner operations ====================

    pub async fn create_draft(&self, caller: &Caller, draft: WillDraft) -> EngineResult<WillRecord> {
        self.authenticate(caller).await?;
        let terms = self.terms_from(draft).await?;
        validate_letter(terms.letter.as_deref())?;

        let record = WillRecord::new_draft(caller.identity.clone(), terms, self.clock.now());
        self.store.insert(&record).await?;

        info!(will_id = %record.id, owner = %record.owner, "Will draft created");
        Ok(record)
    }

    pub async fn update_draft(
        &self,
        id: WillId,
        caller: &Caller,
        draft: WillDraft,
    ) -> EngineResult<WillRecord> {
        self.authenticate(caller).await?;
        let terms = self.terms_from(draft).await?;

        let committed = self
            .commit(id, |record, _now| {
                ensure_owner(record, caller)?;
                record.replace_terms(terms.clone())
            })
            .await?;

        debug!(will_id = %id, "Will draft updated");
        Ok(committed.record)
    }

    pub async fn deposit(&self, id: WillId, caller: &Caller, amount: u64) -> EngineResult<WillRecord> {
        self.authenticate(caller).await?;

        let committed = self
            .commit(id, |record, _now| {
                ensure_owner(record, caller)?;
                record.deposit(amount)
            })
            .await?;

        info!(
            will_id = %id,
            amount,
            total_funds = committed.record.total_funds,
            "Funds deposited"
        );
        Ok(committed.record)
    }

    pub async fn deploy(&self, id: WillId, caller: &Caller) -> EngineResult<WillRecord> {
        self.authenticate(caller).await?;

        let committed = self
            .commit(id, |record, now| {
                ensure_owner(record, caller)?;
                record.deploy(now)
            })
            .await?;

        info!(
            will_id = %id,
            beneficiaries = committed.record.beneficiaries.len(),
            total_funds = committed.record.total_funds,
            "Will deployed"
        );
        Ok(committed.record)
    }

    /// Proof of life. Also the only way back from `MissedCheckIn`.
    pub async fn check_in(&self, id: WillId, caller: &Caller) -> EngineResult<WillRecord> {
        self.authenticate(caller).await?;

        let committed = self
            .commit(id, |record, now| {
                ensure_owner(record, caller)?;
                record.check_in(now)
            })
            .await?;

        let record = committed.record;
        if committed.value && committed.changed {
            info!(will_id = %id, "Missed deadline rescued by check-in");
            self.announce(&record, EventKind::CheckInRestored, Recipient::everyone(&record));
        } else {
            debug!(will_id = %id, last_check_in_at = %record.last_check_in_at, "Check-in recorded");
        }
        Ok(record)
    }

    /// Emergency execution with the override secret, skipping any grace period.
    pub async fn override_execute(&self, id: WillId, password: &str) -> EngineResult<WillRecord> {
        let stored = self.store.get(id).await?;
        let credential = stored.as_ref().and_then(|r| r.credential.clone());
        if !self.verify_secret(credential, password).await {
            warn!(will_id = %id, "Override rejected");
            return Err(EngineError::InvalidCredential);
        }

        let policy = &self.config.retry;
        let committed = self
            .commit(id, |record, now| {
                record.execute(ExecutionTrigger::Override, now)?;
                Ok(record.claim_due_legs(now, policy))
            })
            .await?;

        info!(will_id = %id, "Will executed by override");
        let record = committed.record;
        self.announce(&record, EventKind::ExecutedByOverride, Recipient::everyone(&record));
        Ok(self.dispatch(record, committed.value).await)
    }

    pub async fn cancel(&self, id: WillId, caller: &Caller) -> EngineResult<()> {
        self.authenticate(caller).await?;

        for attempt in 1..=self.config.max_cas_attempts {
            let record = self.load(id).await?;
            ensure_owner(&record, caller)?;
            if record.status != WillStatus::Draft {
                return Err(EngineError::invalid_state(record.status, "cancel"));
            }
            if self.store.delete_if_version(id, record.version).await? {
                info!(will_id = %id, "Will draft cancelled");
                return Ok(());
            }
            debug!(will_id = %id, attempt, "Version conflict on cancel");
        }
        Err(EngineError::ConcurrencyConflict(id))
    }

    /// Re-dispatch distribution legs whose retry time has come.
    pub async fn retry_distribution(&self, id: WillId, caller: &Caller) -> EngineResult<WillRecord> {
        self.authenticate(caller).await?;

        let policy = &self.config.retry;
        let committed = self
            .commit(id, |record, now| {
                ensure_owner(record, caller)?;
                if record.status != WillStatus::Executed {
                    return Err(EngineError::invalid_state(record.status, "retry_distribution"));
                }
                Ok(record.claim_due_legs(now, policy))
            })
            .await?;

        Ok(self.dispatch(committed.record, committed.value).await)
    }

    // ==================== Queries ====================

    pub async fn get(&self, id: WillId, caller: &Caller) -> EngineResult<WillRecord> {
        self.authenticate(caller).await?;
        let record = self.load(id).await?;
        ensure_owner(&record, caller)?;
        Ok(record)
    }

    pub async fn list_for_owner(&self, caller: &Caller) -> EngineResult<Vec<WillRecord>> {
        self.authenticate(caller).await?;
        Ok(self.store.list_by_owner(&caller.identity).await?)
    }

    /// The owner may always read the letter; a beneficiary once the will executed.
    pub async fn read_letter(&self, id: WillId, caller: &Caller) -> EngineResult<Option<String>> {
        self.authenticate(caller).await?;
        let record = self.load(id).await?;

        if record.is_owned_by(&caller.identity) {
            return Ok(record.letter);
        }
        if record.beneficiary_by_wallet(&caller.identity).is_none() {
            return Err(EngineError::Unauthorized);
        }
        if record.status != WillStatus::Executed {
            return Err(EngineError::invalid_state(record.status, "read_letter"));
        }
        Ok(record.letter)
    }

    // ==================== Scheduled maintenance ====================

    /// Apply whatever the passage of time requires of one record. Idempotent for
    /// a fixed `now`.
    pub async fn sweep(&self, id: WillId) -> EngineResult<SweepOutcome> {
        let policy = &self.config.retry;
        let committed = self
            .commit(id, |record, now| {
                let action = record.evaluate_sweep(now);
                let claimed = match action {
                    SweepAction::Nothing => Vec::new(),
                    SweepAction::Remind { reminders_due } => {
                        record.mark_reminded(reminders_due);
                        Vec::new()
                    }
                    SweepAction::MissDeadline => {
                        record.miss_deadline(now)?;
                        Vec::new()
                    }
                    SweepAction::Execute => {
                        record.execute(ExecutionTrigger::GracePeriodElapsed, now)?;
                        record.claim_due_legs(now, policy)
                    }
                    SweepAction::RetryLegs => record.claim_due_legs(now, policy),
                };
                Ok((action, claimed))
            })
            .await?;

        let (action, claimed) = committed.value;
        let mut record = committed.record;

        if committed.changed {
            match action {
                SweepAction::Nothing => {}
                SweepAction::Remind { reminders_due } => {
                    debug!(will_id = %id, reminders_due, "Check-in reminder due");
                    self.announce(
                        &record,
                        EventKind::CheckInReminder,
                        vec![Recipient::owner_of(&record)],
                    );
                }
                SweepAction::MissDeadline => {
                    info!(will_id = %id, "Hard deadline missed, grace period started");
                    self.announce(&record, EventKind::DeadlineMissed, Recipient::everyone(&record));
                }
                SweepAction::Execute => {
                    info!(will_id = %id, "Grace period elapsed, will executed");
                    self.announce(
                        &record,
                        EventKind::ExecutedAfterGrace,
                        Recipient::everyone(&record),
                    );
                    record = self.dispatch(record, claimed).await;
                }
                SweepAction::RetryLegs => {
                    record = self.dispatch(record, claimed).await;
                }
            }
        }

        Ok(SweepOutcome {
            action,
            record,
            changed: committed.changed,
        })
    }

    // ==================== Internals ====================

    async fn authenticate(&self, caller: &Caller) -> EngineResult<()> {
        if self.identity.verify(&caller.identity, &caller.proof).await {
            Ok(())
        } else {
            debug!(identity = %caller.identity, "Identity proof rejected");
            Err(EngineError::Unauthorized)
        }
    }

    async fn load(&self, id: WillId) -> EngineResult<WillRecord> {
        self.store.get(id).await?.ok_or(EngineError::NotFound(id))
    }

    async fn terms_from(&self, draft: WillDraft) -> EngineResult<WillTerms> {
        let credential = match draft.override_password {
            Some(secret) => {
                validate_password(&secret.password, &secret.confirmation)?;
                Some(self.hash_secret(secret.password).await?)
            }
            None => None,
        };

        Ok(WillTerms {
            beneficiaries: draft.beneficiaries,
            check_in_interval: draft.check_in_interval,
            letter: draft.letter,
            credential,
        })
    }

    async fn hash_secret(&self, secret: String) -> EngineResult<OverrideCredential> {
        let iterations = self.config.pbkdf2_iterations;
        let credential = tokio::task::spawn_blocking(move || {
            OverrideCredential::derive(&secret, iterations)
        })
        .await
        .map_err(|e| CredentialError::Worker(e.to_string()))??;
        Ok(credential)
    }

    /// Unknown wills still pay for one derivation so timing does not reveal them.
    async fn verify_secret(&self, credential: Option<OverrideCredential>, secret: &str) -> bool {
        let secret = secret.to_string();
        let iterations = self.config.pbkdf2_iterations;
        tokio::task::spawn_blocking(move || match credential {
            Some(credential) => credential.verify(&secret),
            None => OverrideCredential::verify_decoy(&secret, iterations),
        })
        .await
        .unwrap_or(false)
    }

    async fn commit<T, F>(&self, id: WillId, mut apply: F) -> EngineResult<Committed<T>>
    where
        F: FnMut(&mut WillRecord, DateTime<Utc>) -> EngineResult<T>,
    {
        for attempt in 1..=self.config.max_cas_attempts {
            let current = self.load(id).await?;
            let now = self.clock.now();

            let mut next = current.clone();
            let value = apply(&mut next, now)?;
            if next == current {
                return Ok(Committed {
                    record: current,
                    value,
                    changed: false,
                });
            }

            next.version = current.version + 1;
            if self.store.put_if_version(&next, current.version).await? {
                return Ok(Committed {
                    record: next,
                    value,
                    changed: true,
                });
            }
            debug!(will_id = %id, attempt, "Version conflict, re-evaluating with fresh state");
        }

        warn!(
            will_id = %id,
            attempts = self.config.max_cas_attempts,
            "Giving up after repeated version conflicts"
        );
        Err(EngineError::ConcurrencyConflict(id))
    }

    /// Deliver in the background. A slow or failing sink never holds up or undoes
    /// the transition that triggered it.
    fn announce(&self, record: &WillRecord, kind: EventKind, recipients: Vec<Recipient>) {
        let notifier = Arc::clone(&self.notifier);
        let will_id = record.id;
        self.deliveries.spawn(async move {
            if let Err(e) = notifier.notify(will_id, kind, &recipients).await {
                warn!(%will_id, event = kind.as_str(), error = %e, "Notification failed");
            }
        });
    }

    /// Hand claimed legs to the executor and record the outcomes. Failures stay on
    /// the legs for a later retry; the returned record is always `Executed`.
    async fn dispatch(&self, record: WillRecord, claimed: Vec<DistributionLeg>) -> WillRecord {
        if claimed.is_empty() {
            return record;
        }

        let mut outcomes = Vec::with_capacity(claimed.len());
        for leg in &claimed {
            let request = TransferRequest {
                will_id: record.id,
                beneficiary_id: leg.beneficiary_id,
                wallet_address: leg.wallet_address.clone(),
                amount: leg.amount,
                attempt: leg.attempts,
            };
            let outcome = self.executor.transfer(&request).await;
            if let TransferOutcome::Failed(reason) = &outcome {
                let failure = EngineError::DistributionFailure {
                    will_id: record.id,
                    beneficiary_id: leg.beneficiary_id,
                    reason: reason.clone(),
                };
                warn!(attempt = leg.attempts, error = %failure, "Distribution leg pending retry");
            }
            outcomes.push((leg.beneficiary_id, leg.attempts, outcome));
        }

        let recorded = self
            .commit(record.id, |current, now| {
                for (beneficiary_id, attempt, outcome) in &outcomes {
                    current.apply_leg_outcome(*beneficiary_id, *attempt, outcome, now);
                }
                Ok(())
            })
            .await;

        match recorded {
            Ok(committed) => {
                if committed.record.is_fully_distributed() {
                    info!(will_id = %record.id, "Will fully distributed");
                }
                committed.record
            }
            Err(e) => {
                warn!(
                    will_id = %record.id,
                    error = %e,
                    "Could not record transfer outcomes, legs will be redispatched"
                );
                record
            }
        }
    }
}

fn ensure_owner(record: &WillRecord, caller: &Caller) -> EngineResult<()> {
    if record.is_owned_by(&caller.identity) {
        Ok(())
    } else {
        Err(EngineError::Unauthorized)
    }
}
