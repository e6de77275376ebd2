#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::PgPool;
use tokio::sync::Semaphore;

use smartwill_backend::api::{create_router, AppState};
use smartwill_backend::auth::issue_token;
use smartwill_backend::clock::ManualClock;
use smartwill_backend::engine::{EngineConfig, OverridePassword, WillDraft};
use smartwill_backend::executor::{
    DistributionExecutor, RetryPolicy, TransferOutcome, TransferRequest,
};
use smartwill_backend::identity::{Caller, JwtIdentityProvider};
use smartwill_backend::notify::{EventKind, NotificationSink, NotifyError, Recipient};
use smartwill_backend::store::{
    DueCursor, InMemoryWillStore, PgWillStore, StoreResult, WillStore,
};
use smartwill_backend::will::{
    Beneficiary, CheckInInterval, WalletAddress, WillId, WillRecord, WillStatus,
};
use smartwill_backend::ProofOfLifeEngine;

pub const TEST_JWT_SECRET: &str = "test_secret_change_in_production";
pub const OVERRIDE_SECRET: &str = "correct horse battery";
pub const TEST_ITERATIONS: u32 = 1_000;

// ── identities ───────────────────────────────────────────────────────────────

pub fn wallet(n: u64) -> WalletAddress {
    WalletAddress::parse(&format!("0x{:040x}", n)).expect("valid test wallet")
}

pub fn owner() -> WalletAddress {
    wallet(0xa11ce)
}

pub fn token_for(wallet: &WalletAddress) -> String {
    issue_token(wallet, TEST_JWT_SECRET, Duration::hours(1)).expect("Failed to sign test token")
}

pub fn caller(wallet: &WalletAddress) -> Caller {
    Caller::new(wallet.clone(), token_for(wallet))
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

// ── drafts ───────────────────────────────────────────────────────────────────

/// Beneficiary `i` gets wallet `0x...(100 + i)`.
pub fn beneficiaries(shares: &[u32]) -> Vec<Beneficiary> {
    shares
        .iter()
        .enumerate()
        .map(|(i, share)| Beneficiary::new(wallet(100 + i as u64), *share))
        .collect()
}

pub fn draft(shares: &[u32]) -> WillDraft {
    WillDraft {
        beneficiaries: beneficiaries(shares),
        check_in_interval: CheckInInterval::Yearly,
        letter: Some("To my family.".to_string()),
        override_password: Some(OverridePassword {
            password: OVERRIDE_SECRET.to_string(),
            confirmation: OVERRIDE_SECRET.to_string(),
        }),
    }
}

// ── collaborators ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub will_id: WillId,
    pub kind: EventKind,
    pub recipients: Vec<Recipient>,
}

/// Records every delivery attempt. Can be told to fail every delivery, or to
/// hold each delivery until the test releases it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: bool,
    gate: Option<Semaphore>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Let `n` held deliveries through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.sent().into_iter().map(|n| n.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.sent().iter().filter(|n| n.kind == kind).count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(
        &self,
        will_id: WillId,
        kind: EventKind,
        recipients: &[Recipient],
    ) -> Result<(), NotifyError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.sent.lock().unwrap().push(SentNotification {
            will_id,
            kind,
            recipients: recipients.to_vec(),
        });
        if self.failing {
            return Err(NotifyError::Delivery("notification relay down".to_string()));
        }
        Ok(())
    }
}

/// Records every transfer and fails those addressed to wallets marked failing.
#[derive(Default)]
pub struct ScriptedExecutor {
    failing: Mutex<HashSet<WalletAddress>>,
    requests: Mutex<Vec<TransferRequest>>,
}

impl ScriptedExecutor {
    pub fn fail_for(&self, wallet: &WalletAddress) {
        self.failing.lock().unwrap().insert(wallet.clone());
    }

    pub fn recover(&self, wallet: &WalletAddress) {
        self.failing.lock().unwrap().remove(wallet);
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DistributionExecutor for ScriptedExecutor {
    async fn transfer(&self, request: &TransferRequest) -> TransferOutcome {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.lock().unwrap().contains(&request.wallet_address) {
            TransferOutcome::Failed("executor unavailable".to_string())
        } else {
            TransferOutcome::Success
        }
    }
}

type Interleaving = Box<dyn FnOnce(&mut WillRecord) + Send>;

/// Wraps the in-memory store and lets a test slip a competing write in just
/// before the engine's next conditional write.
#[derive(Default)]
pub struct InterleavingStore {
    inner: InMemoryWillStore,
    pending: Mutex<Vec<Interleaving>>,
    rejected_writes: Mutex<u32>,
}

impl InterleavingStore {
    pub fn before_next_write(&self, change: impl FnOnce(&mut WillRecord) + Send + 'static) {
        self.pending.lock().unwrap().push(Box::new(change));
    }

    /// Reject the next `n` conditional writes as if another writer got there first.
    pub fn reject_writes(&self, n: u32) {
        *self.rejected_writes.lock().unwrap() = n;
    }
}

#[async_trait]
impl WillStore for InterleavingStore {
    async fn get(&self, id: WillId) -> StoreResult<Option<WillRecord>> {
        self.inner.get(id).await
    }

    async fn insert(&self, record: &WillRecord) -> StoreResult<()> {
        self.inner.insert(record).await
    }

    async fn put_if_version(&self, record: &WillRecord, expected_version: u64) -> StoreResult<bool> {
        {
            let mut rejected = self.rejected_writes.lock().unwrap();
            if *rejected > 0 {
                *rejected -= 1;
                return Ok(false);
            }
        }

        let change = {
            let mut pending = self.pending.lock().unwrap();
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };
        if let Some(change) = change {
            if let Some(current) = self.inner.get(record.id).await? {
                let mut competing = current.clone();
                change(&mut competing);
                competing.version = current.version + 1;
                self.inner.put_if_version(&competing, current.version).await?;
            }
        }

        self.inner.put_if_version(record, expected_version).await
    }

    async fn delete_if_version(&self, id: WillId, expected_version: u64) -> StoreResult<bool> {
        self.inner.delete_if_version(id, expected_version).await
    }

    async fn list_due_before(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: usize,
    ) -> StoreResult<Vec<WillRecord>> {
        self.inner.list_due_before(now, after, limit).await
    }

    async fn list_by_owner(&self, owner: &WalletAddress) -> StoreResult<Vec<WillRecord>> {
        self.inner.list_by_owner(owner).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

// ── engine harness ───────────────────────────────────────────────────────────

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        max_cas_attempts: 3,
        pbkdf2_iterations: TEST_ITERATIONS,
        retry: RetryPolicy {
            initial_delay_secs: 60,
            max_delay_secs: 3600,
        },
    }
}

pub struct Harness {
    pub engine: Arc<ProofOfLifeEngine>,
    pub store: Arc<dyn WillStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub executor: Arc<ScriptedExecutor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryWillStore::new()))
    }

    pub fn with_store(store: Arc<dyn WillStore>) -> Self {
        Self::with_notifier(store, RecordingNotifier::default())
    }

    pub fn with_notifier(store: Arc<dyn WillStore>, notifier: RecordingNotifier) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let notifier = Arc::new(notifier);
        let executor = Arc::new(ScriptedExecutor::default());
        let engine = Arc::new(ProofOfLifeEngine::new(
            store.clone(),
            Arc::new(JwtIdentityProvider::new(TEST_JWT_SECRET)),
            notifier.clone(),
            executor.clone(),
            clock.clone(),
            engine_config(),
        ));
        Self {
            engine,
            store,
            clock,
            notifier,
            executor,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Draft, fund and deploy a will for [`owner`].
    pub async fn active_will(&self, shares: &[u32], funds: u64) -> WillRecord {
        let owner = caller(&owner());
        let record = self
            .engine
            .create_draft(&owner, draft(shares))
            .await
            .expect("create draft");
        if funds > 0 {
            self.engine
                .deposit(record.id, &owner, funds)
                .await
                .expect("deposit");
        }
        let record = self.engine.deploy(record.id, &owner).await.expect("deploy");
        assert_eq!(record.status, WillStatus::Active);
        record
    }

    pub async fn reload(&self, id: WillId) -> WillRecord {
        self.store
            .get(id)
            .await
            .expect("store read")
            .expect("record present")
    }

    pub fn app(&self, override_attempts_per_minute: u32) -> Router {
        create_router(self.state(override_attempts_per_minute))
    }

    pub fn state(&self, override_attempts_per_minute: u32) -> AppState {
        AppState::new(self.engine.clone(), override_attempts_per_minute)
    }
}

// ── database-backed context ──────────────────────────────────────────────────

pub struct TestContext {
    pub app: Router,
    pub pool: PgPool,
    pub store: Arc<PgWillStore>,
}

impl TestContext {
    /// `None` when `DATABASE_URL` is not set, so database tests skip quietly.
    pub async fn from_env() -> Option<Self> {
        let _ = dotenvy::dotenv();
        let url = std::env::var("DATABASE_URL").ok()?;

        let pool = PgPool::connect(&url)
            .await
            .expect("Failed to connect to test database");
        let store = Arc::new(PgWillStore::new(pool.clone()));
        store.migrate().await.expect("Failed to run migrations");

        let harness = Harness::with_store(store.clone());
        Some(Self {
            app: harness.app(5),
            pool,
            store,
        })
    }
}
