use super::bundle::BundleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Idempotency key for claim retries: one claimant on one unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimKey {
    pub bundle_id: BundleId,
    pub step_number: u32,
    pub operator_id: String,
}

impl ClaimKey {
    pub fn new(bundle_id: BundleId, step_number: u32, operator_id: impl Into<String>) -> Self {
        Self {
            bundle_id,
            step_number,
            operator_id: operator_id.into(),
        }
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.bundle_id, self.step_number, self.operator_id)
    }
}

/// Authoritative record of which operator owns a (bundle, step) unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkAssignment {
    pub bundle_id: BundleId,
    pub step_number: u32,
    pub operator_id: String,
    pub operator_name: String,
    pub claim_key: ClaimKey,
    pub claimed_at: DateTime<Utc>,
}

impl WorkAssignment {
    pub fn new(
        bundle_id: BundleId,
        step_number: u32,
        operator_id: impl Into<String>,
        operator_name: impl Into<String>,
    ) -> Self {
        let operator_id = operator_id.into();
        Self {
            claim_key: ClaimKey::new(bundle_id.clone(), step_number, operator_id.clone()),
            bundle_id,
            step_number,
            operator_id,
            operator_name: operator_name.into(),
            claimed_at: Utc::now(),
        }
    }

    /// Time since the claim, clamped at zero for clock skew
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.claimed_at).max(chrono::Duration::zero())
    }
}

/// A claimable (bundle, step) pair as listed for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub bundle_id: BundleId,
    pub step_number: u32,
    pub operation: String,
    pub machine_type: String,
    pub pieces: u32,
    pub price_per_piece: f64,
    pub lot_number: String,
}
