//! # Work Store
//!
//! The authoritative, shared state of every bundle and its step units.
//!
//! ## Commit model
//!
//! Readers get owned `Bundle` snapshots in which every `StepState` carries the
//! `version` it had when read. Writers send a [`Changeset`]: the new contents of
//! the steps they changed plus version guards on steps they only read. A store
//! applies a changeset all-or-nothing, and only when every expected version still
//! matches; otherwise it reports [`CommitOutcome::VersionConflict`] and writes
//! nothing. Each applied write bumps that step's version by one.
//!
//! Implementations:
//! - [`InMemoryWorkStore`] - process-local store behind `parking_lot` locks
//! - `PgWorkStore` - PostgreSQL row locks via `SELECT ... FOR UPDATE` (feature `postgres`)

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryWorkStore;
#[cfg(feature = "postgres")]
pub use postgres::PgWorkStore;

use crate::models::{Bundle, BundleId, StepState};
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by store implementations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Infrastructure failure; the operation may or may not have been applied
    #[error("Transient store failure: {0}")]
    Transient(String),
    #[error("Duplicate bundle: {0}")]
    Duplicate(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// New contents for one step, valid only if the step still has `expected_version`
#[derive(Debug, Clone, PartialEq)]
pub struct StepWrite {
    pub expected_version: u64,
    pub state: StepState,
}

/// A step that was read but not written; the commit fails if it changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGuard {
    pub step_number: u32,
    pub expected_version: u64,
}

/// All-or-nothing set of step writes against one bundle
#[derive(Debug, Clone, PartialEq)]
pub struct Changeset {
    pub bundle_id: BundleId,
    pub writes: Vec<StepWrite>,
    pub guards: Vec<VersionGuard>,
}

impl Changeset {
    pub fn new(bundle_id: BundleId) -> Self {
        Self {
            bundle_id,
            writes: Vec::new(),
            guards: Vec::new(),
        }
    }

    /// Diff `updated` against the snapshot it was derived from
    ///
    /// Changed steps become writes guarded by their original version. When
    /// `guard_unchanged` is set, every other step is guarded as well, making the
    /// commit conditional on the whole bundle being untouched since the read.
    pub fn diff(original: &Bundle, updated: &Bundle, guard_unchanged: bool) -> Self {
        let mut changeset = Self::new(original.bundle_id.clone());
        for before in &original.steps {
            let after = updated.step(before.step_number());
            match after {
                Some(after) if after != before => changeset.writes.push(StepWrite {
                    expected_version: before.version,
                    state: after.clone(),
                }),
                _ if guard_unchanged => changeset.guards.push(VersionGuard {
                    step_number: before.step_number(),
                    expected_version: before.version,
                }),
                _ => {}
            }
        }
        changeset
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Every (step, version) pair the commit is conditional on
    pub fn expectations(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.writes
            .iter()
            .map(|w| (w.state.step_number(), w.expected_version))
            .chain(
                self.guards
                    .iter()
                    .map(|g| (g.step_number, g.expected_version)),
            )
    }
}

/// Result of a commit that reached the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// A guarded step changed since it was read; nothing was written
    VersionConflict { step_number: u32 },
}

/// Shared, transactional storage for bundles and their step units
#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Persist a batch of new bundles; either every bundle becomes visible or none
    async fn insert_bundles(&self, bundles: &[Bundle]) -> StoreResult<()>;

    async fn load_bundle(&self, bundle_id: &BundleId) -> StoreResult<Option<Bundle>>;

    async fn bundles_for_lot(&self, lot_number: &str) -> StoreResult<Vec<Bundle>>;

    /// Snapshot of every bundle that still has unfinished steps
    async fn active_bundles(&self) -> StoreResult<Vec<Bundle>>;

    /// Apply a changeset atomically, conditional on its expected versions
    async fn commit(&self, changeset: Changeset) -> StoreResult<CommitOutcome>;
}
