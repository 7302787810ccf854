//! Error types for the garment flow core.
//!

use crate::state_machine::errors::StateMachineError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    /// Unknown template, bundle, step or lot
    #[error("Not found: {0}")]
    NotFound(String),
    /// Malformed template, or no template registered for a garment type
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
    /// Optimistic precondition failed; another claimant won the unit
    #[error("Claim conflict on bundle {bundle_id} step {step_number}: {reason}")]
    ClaimConflict {
        bundle_id: String,
        step_number: u32,
        reason: String,
    },
    /// Caller does not hold the live assignment for the unit
    #[error("Operator {operator_id} does not hold bundle {bundle_id} step {step_number}")]
    NotAssigned {
        bundle_id: String,
        step_number: u32,
        operator_id: String,
    },
    #[error("Operator {operator_id} cannot run machine type {machine_type}")]
    MachineIncompatible {
        operator_id: String,
        machine_type: String,
    },
    /// Infrastructure-level commit failure that survived every retry
    #[error("Transient store failure after {attempts} attempts: {reason}")]
    TransientStoreFailure { attempts: u32, reason: String },
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Store error: {0}")]
    StoreError(String),
}

impl FlowError {
    /// Only infrastructure failures are worth retrying; a lost race never is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStoreFailure { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ClaimConflict { .. })
    }

    pub fn claim_conflict(
        bundle_id: impl ToString,
        step_number: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self::ClaimConflict {
            bundle_id: bundle_id.to_string(),
            step_number,
            reason: reason.into(),
        }
    }

    pub fn not_assigned(
        bundle_id: impl ToString,
        step_number: u32,
        operator_id: impl Into<String>,
    ) -> Self {
        Self::NotAssigned {
            bundle_id: bundle_id.to_string(),
            step_number,
            operator_id: operator_id.into(),
        }
    }
}

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(reason) => FlowError::TransientStoreFailure {
                attempts: 1,
                reason,
            },
            StoreError::Duplicate(id) => {
                FlowError::ValidationError(format!("Bundle {id} already exists"))
            }
            StoreError::NotFound(what) => FlowError::NotFound(what),
            StoreError::Backend(reason) => FlowError::StoreError(reason),
        }
    }
}

impl From<StateMachineError> for FlowError {
    fn from(err: StateMachineError) -> Self {
        FlowError::InvalidTransition(err.to_string())
    }
}

impl From<serde_yaml::Error> for FlowError {
    fn from(err: serde_yaml::Error) -> Self {
        FlowError::InvalidTemplate(format!("YAML parsing error: {err}"))
    }
}

impl From<config::ConfigError> for FlowError {
    fn from(err: config::ConfigError) -> Self {
        FlowError::ConfigurationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
