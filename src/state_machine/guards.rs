use super::errors::{business_rule_violation, dependencies_not_met, GuardResult};
use crate::models::Bundle;

/// Trait for implementing state transition guards
pub trait StateGuard<T> {
    /// Check if a transition of `step_number` is allowed
    fn check(&self, entity: &T, step_number: u32) -> GuardResult<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// Guard to check if step dependencies are satisfied before unlocking a step
pub struct StepDependenciesMetGuard;

impl StateGuard<Bundle> for StepDependenciesMetGuard {
    fn check(&self, bundle: &Bundle, step_number: u32) -> GuardResult<()> {
        if bundle.prerequisites_met(step_number) {
            return Ok(());
        }

        let unmet: Vec<u32> = bundle
            .step(step_number)
            .map(|step| {
                step.definition
                    .prerequisites
                    .iter()
                    .copied()
                    .filter(|p| {
                        !bundle
                            .step_status(*p)
                            .is_some_and(|s| s.satisfies_dependencies())
                    })
                    .collect()
            })
            .unwrap_or_default();

        Err(dependencies_not_met(format!(
            "Step {step_number} of bundle {} waits on steps {unmet:?}",
            bundle.bundle_id
        )))
    }

    fn description(&self) -> &'static str {
        "All step dependencies must be satisfied"
    }
}

/// Guard to check that nobody holds the step before it is claimed
pub struct StepUnassignedGuard;

impl StateGuard<Bundle> for StepUnassignedGuard {
    fn check(&self, bundle: &Bundle, step_number: u32) -> GuardResult<()> {
        match bundle.step(step_number).and_then(|s| s.assignment.as_ref()) {
            Some(assignment) => Err(business_rule_violation(format!(
                "Step {step_number} of bundle {} is held by {}",
                bundle.bundle_id, assignment.operator_id
            ))),
            None => Ok(()),
        }
    }

    fn description(&self) -> &'static str {
        "Step must not be assigned"
    }
}

/// Guard to check that the whole bundle passed the step before completing it
pub struct PiecesReachedGuard;

impl StateGuard<Bundle> for PiecesReachedGuard {
    fn check(&self, bundle: &Bundle, step_number: u32) -> GuardResult<()> {
        let done = bundle
            .step(step_number)
            .map(|s| s.completed_pieces)
            .unwrap_or_default();
        if done >= bundle.pieces {
            Ok(())
        } else {
            Err(business_rule_violation(format!(
                "Step {step_number} of bundle {} has {done} of {} pieces",
                bundle.bundle_id, bundle.pieces
            )))
        }
    }

    fn description(&self) -> &'static str {
        "Completed pieces must reach the bundle size"
    }
}
