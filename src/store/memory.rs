//! Process-local [`WorkStore`] backed by `parking_lot` locks.
//!
//! The bundle map sits behind one `RwLock`, taken for writing only when a batch
//! of bundles is inserted, so a batch becomes visible in one step. Each bundle
//! has its own `Mutex`; a commit holds it while checking versions and applying
//! writes, which makes the check-then-set indivisible for that bundle.

use super::{Changeset, CommitOutcome, StoreError, StoreResult, WorkStore};
use crate::models::{Bundle, BundleId};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    bundles: HashMap<BundleId, Arc<Mutex<Bundle>>>,
    lots: HashMap<String, Vec<BundleId>>,
}

#[derive(Debug, Default)]
pub struct InMemoryWorkStore {
    inner: RwLock<Inner>,
}

impl InMemoryWorkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bundle_count(&self) -> usize {
        self.inner.read().bundles.len()
    }

    fn handle(&self, bundle_id: &BundleId) -> Option<Arc<Mutex<Bundle>>> {
        self.inner.read().bundles.get(bundle_id).cloned()
    }

    fn snapshot_where(&self, keep: impl Fn(&Bundle) -> bool) -> Vec<Bundle> {
        let handles: Vec<Arc<Mutex<Bundle>>> =
            self.inner.read().bundles.values().cloned().collect();
        let mut bundles: Vec<Bundle> = handles
            .iter()
            .map(|h| h.lock().clone())
            .filter(|b| keep(b))
            .collect();
        bundles.sort_by(|a, b| a.bundle_id.cmp(&b.bundle_id));
        bundles
    }
}

#[async_trait]
impl WorkStore for InMemoryWorkStore {
    async fn insert_bundles(&self, bundles: &[Bundle]) -> StoreResult<()> {
        let mut inner = self.inner.write();

        let mut batch_ids = std::collections::HashSet::new();
        for bundle in bundles {
            if inner.bundles.contains_key(&bundle.bundle_id)
                || !batch_ids.insert(bundle.bundle_id.clone())
            {
                return Err(StoreError::Duplicate(bundle.bundle_id.to_string()));
            }
        }

        for bundle in bundles {
            inner
                .lots
                .entry(bundle.lot_number.clone())
                .or_default()
                .push(bundle.bundle_id.clone());
            inner.bundles.insert(
                bundle.bundle_id.clone(),
                Arc::new(Mutex::new(bundle.clone())),
            );
        }

        debug!(count = bundles.len(), "Inserted bundle batch");
        Ok(())
    }

    async fn load_bundle(&self, bundle_id: &BundleId) -> StoreResult<Option<Bundle>> {
        Ok(self.handle(bundle_id).map(|h| h.lock().clone()))
    }

    async fn bundles_for_lot(&self, lot_number: &str) -> StoreResult<Vec<Bundle>> {
        let handles: Vec<Arc<Mutex<Bundle>>> = {
            let inner = self.inner.read();
            inner
                .lots
                .get(lot_number)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| inner.bundles.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(handles.iter().map(|h| h.lock().clone()).collect())
    }

    async fn active_bundles(&self) -> StoreResult<Vec<Bundle>> {
        Ok(self.snapshot_where(Bundle::has_unfinished_steps))
    }

    async fn commit(&self, changeset: Changeset) -> StoreResult<CommitOutcome> {
        let handle = self
            .handle(&changeset.bundle_id)
            .ok_or_else(|| StoreError::NotFound(format!("bundle {}", changeset.bundle_id)))?;

        let mut bundle = handle.lock();

        for (step_number, expected_version) in changeset.expectations() {
            let current = bundle
                .step(step_number)
                .ok_or_else(|| {
                    StoreError::NotFound(format!(
                        "step {step_number} of bundle {}",
                        changeset.bundle_id
                    ))
                })?
                .version;
            if current != expected_version {
                debug!(
                    bundle_id = %changeset.bundle_id,
                    step_number = step_number,
                    expected_version = expected_version,
                    current_version = current,
                    "Version conflict, commit rejected"
                );
                return Ok(CommitOutcome::VersionConflict { step_number });
            }
        }

        for write in changeset.writes {
            let step_number = write.state.step_number();
            if let Some(slot) = bundle.step_mut(step_number) {
                let mut state = write.state;
                state.version = write.expected_version + 1;
                *slot = state;
            }
        }

        Ok(CommitOutcome::Committed)
    }
}
