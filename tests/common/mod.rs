#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use garment_flow::config::ClaimConfig;
use garment_flow::events::{EventPublisher, PublishedEvent};
use garment_flow::models::{
    Bundle, BundleId, CuttingOutput, OperatorInfo, ProcessStepDefinition, ProcessTemplate,
};
use garment_flow::orchestration::{BundleFactory, ProgressAggregator, WorkClaimCoordinator};
use garment_flow::registry::ProcessTemplateRegistry;
use garment_flow::store::{
    Changeset, CommitOutcome, InMemoryWorkStore, StoreError, StoreResult, WorkStore,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Collar and placket in parallel, then the shoulder join
pub fn polo_template() -> ProcessTemplate {
    ProcessTemplate::new(
        "polo",
        vec![
            ProcessStepDefinition::new(1, "Collar", "single_needle")
                .with_price(1.5)
                .with_estimated_minutes(2.0)
                .parallel(),
            ProcessStepDefinition::new(2, "Placket", "single_needle")
                .with_price(1.25)
                .with_estimated_minutes(1.5)
                .parallel(),
            ProcessStepDefinition::new(3, "ShoulderJoin", "overlock")
                .with_price(0.75)
                .with_prerequisites([1, 2]),
        ],
    )
    .unwrap()
}

/// Linear three-step tee
pub fn tee_template() -> ProcessTemplate {
    ProcessTemplate::new(
        "tee",
        vec![
            ProcessStepDefinition::new(1, "Shoulder", "overlock").with_price(0.5),
            ProcessStepDefinition::new(2, "Sleeve", "overlock")
                .with_price(0.5)
                .with_prerequisites([1]),
            ProcessStepDefinition::new(3, "Hem", "flatlock")
                .with_price(0.25)
                .with_prerequisites([2]),
        ],
    )
    .unwrap()
}

/// Short backoff so transient-failure tests stay fast
pub fn fast_claim_config() -> ClaimConfig {
    ClaimConfig {
        max_attempts: 5,
        base_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
        jitter_factor: 0.1,
        max_conflict_retries: 64,
    }
}

pub fn operator(id: &str, machines: &[&str]) -> OperatorInfo {
    machines
        .iter()
        .fold(OperatorInfo::new(id, format!("Operator {id}")), |op, m| {
            op.with_machine(*m)
        })
}

/// Every machine used by the fixtures
pub fn all_round_operator(id: &str) -> OperatorInfo {
    operator(id, &["single_needle", "overlock", "flatlock", "cutter", "manual"])
}

pub struct Harness {
    pub store: Arc<dyn WorkStore>,
    pub registry: Arc<ProcessTemplateRegistry>,
    pub factory: BundleFactory,
    pub coordinator: WorkClaimCoordinator,
    pub progress: ProgressAggregator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryWorkStore::new()))
    }

    pub fn with_store(store: Arc<dyn WorkStore>) -> Self {
        let registry = Arc::new(ProcessTemplateRegistry::new());
        registry.register(polo_template()).unwrap();
        registry.register(tee_template()).unwrap();

        let factory = BundleFactory::new(store.clone(), registry.clone());
        let coordinator = WorkClaimCoordinator::with_config(
            store.clone(),
            EventPublisher::new(1024),
            &fast_claim_config(),
        );
        let progress = ProgressAggregator::new(store.clone());
        Self {
            store,
            registry,
            factory,
            coordinator,
            progress,
        }
    }

    /// One polo bundle of `pieces` in lot `lot`
    pub async fn polo_bundle(&self, lot: &str, pieces: u32) -> BundleId {
        let output = CuttingOutput::new(lot, "ART-POLO", "polo").with_row("NAVY", "XL", pieces);
        let bundles = self.factory.create_bundles(&output).await.unwrap();
        bundles[0].bundle_id.clone()
    }

    /// Insert a bundle built from an arbitrary template
    pub async fn bundle_from(&self, template: &ProcessTemplate, pieces: u32) -> BundleId {
        let bundle = Bundle::from_template(template, "LOTX", "ART-X", "RED", "M", pieces, 1);
        let bundle_id = bundle.bundle_id.clone();
        self.store.insert_bundles(&[bundle]).await.unwrap();
        bundle_id
    }

    pub async fn snapshot(&self, bundle_id: &BundleId) -> Bundle {
        self.coordinator.bundle_snapshot(bundle_id).await.unwrap()
    }

    /// Claim and fully complete one step as `operator_id`
    pub async fn finish_step(&self, bundle_id: &BundleId, step_number: u32, operator_id: &str) {
        let operator = all_round_operator(operator_id);
        let pieces = self.snapshot(bundle_id).await.pieces;
        self.coordinator
            .claim(bundle_id, step_number, &operator)
            .await
            .unwrap();
        self.coordinator
            .complete_pieces(bundle_id, step_number, operator_id, pieces)
            .await
            .unwrap();
    }
}

/// Everything currently buffered on a subscription
pub fn drain(rx: &mut broadcast::Receiver<PublishedEvent>) -> Vec<PublishedEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn names(events: &[PublishedEvent]) -> Vec<&str> {
    events.iter().map(|e| e.name.as_str()).collect()
}

/// How an injected commit failure behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Fail without writing anything
    BeforeApply,
    /// Write the changeset, then report a failure anyway
    AfterApply,
}

/// Store wrapper that turns the next N commits into transient failures
pub struct FlakyStore {
    inner: InMemoryWorkStore,
    failures_remaining: AtomicU32,
    mode: parking_lot::Mutex<FailureMode>,
    commit_calls: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryWorkStore::new(),
            failures_remaining: AtomicU32::new(0),
            mode: parking_lot::Mutex::new(FailureMode::BeforeApply),
            commit_calls: AtomicU32::new(0),
        }
    }

    pub fn fail_next(&self, count: u32, mode: FailureMode) {
        *self.mode.lock() = mode;
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn commit_calls(&self) -> u32 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl WorkStore for FlakyStore {
    async fn insert_bundles(&self, bundles: &[Bundle]) -> StoreResult<()> {
        self.inner.insert_bundles(bundles).await
    }

    async fn load_bundle(&self, bundle_id: &BundleId) -> StoreResult<Option<Bundle>> {
        self.inner.load_bundle(bundle_id).await
    }

    async fn bundles_for_lot(&self, lot_number: &str) -> StoreResult<Vec<Bundle>> {
        self.inner.bundles_for_lot(lot_number).await
    }

    async fn active_bundles(&self) -> StoreResult<Vec<Bundle>> {
        self.inner.active_bundles().await
    }

    async fn commit(&self, changeset: Changeset) -> StoreResult<CommitOutcome> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if !self.take_failure() {
            return self.inner.commit(changeset).await;
        }
        let mode = *self.mode.lock();
        if mode == FailureMode::AfterApply {
            self.inner.commit(changeset).await?;
        }
        Err(StoreError::Transient("connection reset by peer".to_string()))
    }
}
