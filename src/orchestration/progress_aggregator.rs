//! # Progress Aggregator
//!
//! Derived completion figures for bundles and lots. Nothing here is stored;
//! every figure is recomputed from a store snapshot, so repeated calls over the
//! same state always agree.

use crate::error::{FlowError, Result};
use crate::models::Bundle;
use crate::orchestration::retry::RetryPolicy;
use crate::store::WorkStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Completion summary of one cutting lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotProgress {
    pub lot_number: String,
    pub bundle_count: usize,
    pub completed_bundles: usize,
    /// Mean step-weighted bundle progress, 0.0 - 1.0
    pub progress: f64,
}

impl LotProgress {
    pub fn is_complete(&self) -> bool {
        self.bundle_count > 0 && self.completed_bundles == self.bundle_count
    }
}

pub struct ProgressAggregator {
    store: Arc<dyn WorkStore>,
    retry: RetryPolicy,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn WorkStore>) -> Self {
        Self::with_retry_policy(store, RetryPolicy::default())
    }

    pub fn with_retry_policy(store: Arc<dyn WorkStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Completed steps over total steps
    pub fn bundle_progress(bundle: &Bundle) -> f64 {
        if bundle.steps.is_empty() {
            return 0.0;
        }
        bundle.completed_step_count() as f64 / bundle.total_steps() as f64
    }

    /// Pieces passed through each step over pieces times steps
    pub fn bundle_piece_progress(bundle: &Bundle) -> f64 {
        let target = u64::from(bundle.pieces) * bundle.steps.len() as u64;
        if target == 0 {
            return 0.0;
        }
        let done: u64 = bundle
            .steps
            .iter()
            .map(|step| {
                if step.status.is_terminal() {
                    u64::from(bundle.pieces)
                } else {
                    u64::from(step.completed_pieces.min(bundle.pieces))
                }
            })
            .sum();
        done as f64 / target as f64
    }

    /// Summarize a set of bundles belonging to `lot_number`
    pub fn summarize(lot_number: &str, bundles: &[Bundle]) -> LotProgress {
        let bundle_count = bundles.len();
        let progress = if bundle_count == 0 {
            0.0
        } else {
            bundles.iter().map(Self::bundle_progress).sum::<f64>() / bundle_count as f64
        };
        LotProgress {
            lot_number: lot_number.to_string(),
            bundle_count,
            completed_bundles: bundles.iter().filter(|b| b.is_complete()).count(),
            progress,
        }
    }

    #[instrument(skip(self))]
    pub async fn lot_progress(&self, lot_number: &str) -> Result<LotProgress> {
        let bundles = self
            .retry
            .run("lot_progress", move |_| async move {
                Ok(self.store.bundles_for_lot(lot_number).await?)
            })
            .await?;

        if bundles.is_empty() {
            return Err(FlowError::NotFound(format!("lot {lot_number}")));
        }
        Ok(Self::summarize(lot_number, &bundles))
    }
}
