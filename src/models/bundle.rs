//! # Bundle Model
//!
//! A bundle is a homogeneous batch (same lot, article, color and size) tracked
//! as one unit through every step of its garment's process template.
//!
//! Each bundle owns an independent copy of its step definitions inside its
//! `StepState`s, so per-bundle price overrides never reach the template.
//!
//! ## Optimistic locking
//!
//! Every `StepState` carries a `version` that the store bumps on each committed
//! write. Writers commit with the versions they read; a mismatch aborts the
//! whole commit.

use super::process_template::{ProcessStepDefinition, ProcessTemplate};
use super::work_assignment::WorkAssignment;
use crate::constants::system::BUNDLE_NUMBER_SEPARATOR;
use crate::state_machine::StepStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bundle number in the form `{lot}-{color}-{size}-{seq}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(String);

impl BundleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn compose(lot_number: &str, color: &str, size: &str, sequence: u64) -> Self {
        let sep = BUNDLE_NUMBER_SEPARATOR;
        Self(format!("{lot_number}{sep}{color}{sep}{size}{sep}{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BundleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BundleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Per-bundle state of one process step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub definition: ProcessStepDefinition,
    pub status: StepStatus,
    /// Live assignment; present exactly when `status` is `InProgress`
    pub assignment: Option<WorkAssignment>,
    pub completed_pieces: u32,
    /// Operator whose report completed the step
    pub completed_by: Option<String>,
    pub version: u64,
}

impl StepState {
    /// Seed a step from its template definition
    pub fn seed(definition: ProcessStepDefinition) -> Self {
        let status = StepStatus::initial(!definition.prerequisites.is_empty());
        Self {
            definition,
            status,
            assignment: None,
            completed_pieces: 0,
            completed_by: None,
            version: 0,
        }
    }

    pub fn step_number(&self) -> u32 {
        self.definition.step_number
    }

    pub fn machine_type(&self) -> &str {
        &self.definition.machine_type
    }

    pub fn price_per_piece(&self) -> f64 {
        self.definition.price_per_piece
    }

    pub fn assigned_operator_id(&self) -> Option<&str> {
        self.assignment.as_ref().map(|a| a.operator_id.as_str())
    }

    pub fn is_assigned_to(&self, operator_id: &str) -> bool {
        self.assigned_operator_id() == Some(operator_id)
    }

    /// Ready and nobody holds it
    pub fn is_claimable(&self) -> bool {
        self.status.is_claimable() && self.assignment.is_none()
    }
}

/// A homogeneous production unit and its per-step state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub bundle_id: BundleId,
    pub lot_number: String,
    pub article_id: String,
    pub garment_type: String,
    pub color: String,
    pub size: String,
    pub pieces: u32,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<StepState>,
}

impl Bundle {
    /// Build a bundle with freshly seeded step states copied from `template`
    #[allow(clippy::too_many_arguments)]
    pub fn from_template(
        template: &ProcessTemplate,
        lot_number: &str,
        article_id: &str,
        color: &str,
        size: &str,
        pieces: u32,
        sequence: u64,
    ) -> Self {
        Self {
            bundle_id: BundleId::compose(lot_number, color, size, sequence),
            lot_number: lot_number.to_string(),
            article_id: article_id.to_string(),
            garment_type: template.garment_type.clone(),
            color: color.to_string(),
            size: size.to_string(),
            pieces,
            sequence,
            created_at: Utc::now(),
            steps: template.steps.iter().cloned().map(StepState::seed).collect(),
        }
    }

    pub fn step(&self, step_number: u32) -> Option<&StepState> {
        self.steps.iter().find(|s| s.step_number() == step_number)
    }

    pub fn step_mut(&mut self, step_number: u32) -> Option<&mut StepState> {
        self.steps.iter_mut().find(|s| s.step_number() == step_number)
    }

    pub fn step_status(&self, step_number: u32) -> Option<StepStatus> {
        self.step(step_number).map(|s| s.status)
    }

    /// True when every prerequisite of `step_number` has completed
    pub fn prerequisites_met(&self, step_number: u32) -> bool {
        let Some(step) = self.step(step_number) else {
            return false;
        };
        step.definition.prerequisites.iter().all(|prereq| {
            self.step_status(*prereq)
                .is_some_and(|status| status.satisfies_dependencies())
        })
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn completed_step_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// A bundle is terminal (archived) once every step has completed
    pub fn is_complete(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.status.is_terminal())
    }

    /// Some step still needs an operator; these bundles feed discovery
    pub fn has_unfinished_steps(&self) -> bool {
        self.steps.iter().any(|s| s.status.is_unfinished())
    }

    /// Steps an operator could claim right now
    pub fn claimable_steps(&self) -> impl Iterator<Item = &StepState> {
        self.steps.iter().filter(|s| s.is_claimable())
    }

    pub fn live_assignments(&self) -> impl Iterator<Item = &WorkAssignment> {
        self.steps
            .iter()
            .filter(|s| s.status.is_active())
            .filter_map(|s| s.assignment.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polo() -> ProcessTemplate {
        ProcessTemplate::new(
            "polo",
            vec![
                ProcessStepDefinition::new(1, "Collar", "single_needle").parallel(),
                ProcessStepDefinition::new(2, "Placket", "single_needle").parallel(),
                ProcessStepDefinition::new(3, "ShoulderJoin", "overlock").with_prerequisites([1, 2]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_bundle_number_format() {
        assert_eq!(
            BundleId::compose("LOT42", "NAVY", "XL", 7).as_str(),
            "LOT42-NAVY-XL-7"
        );
    }

    #[test]
    fn test_seeded_statuses() {
        let bundle = Bundle::from_template(&polo(), "LOT42", "ART-1", "NAVY", "XL", 50, 1);
        assert_eq!(bundle.step_status(1), Some(StepStatus::Ready));
        assert_eq!(bundle.step_status(2), Some(StepStatus::Ready));
        assert_eq!(bundle.step_status(3), Some(StepStatus::Waiting));
        assert!(bundle.steps.iter().all(|s| s.completed_pieces == 0 && s.version == 0));
        assert_eq!(bundle.claimable_steps().count(), 2);
        assert!(!bundle.is_complete());
    }

    #[test]
    fn test_prerequisites_met_requires_every_parent() {
        let mut bundle = Bundle::from_template(&polo(), "LOT42", "ART-1", "NAVY", "XL", 50, 1);
        bundle.step_mut(1).unwrap().status = StepStatus::Completed;
        assert!(!bundle.prerequisites_met(3));

        bundle.step_mut(2).unwrap().status = StepStatus::Completed;
        assert!(bundle.prerequisites_met(3));
        assert!(!bundle.prerequisites_met(99));
    }

    #[test]
    fn test_unfinished_until_every_step_completes() {
        let mut bundle = Bundle::from_template(&polo(), "LOT42", "ART-1", "NAVY", "XL", 50, 1);
        assert!(bundle.has_unfinished_steps());

        for step in &mut bundle.steps {
            step.status = StepStatus::Completed;
        }
        assert!(!bundle.has_unfinished_steps());
        assert!(bundle.is_complete());
    }
}
