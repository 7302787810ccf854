//! # Step Dependency Resolver
//!
//! Recomputes which steps of a bundle are unlocked after a completion. Every
//! waiting step is re-evaluated, not only direct successors of the completed
//! step, so a step with several parents unlocks exactly when its last parent
//! completes regardless of completion order.
//!
//! The resolver works on an owned snapshot and never touches the store; the
//! coordinator commits its output together with the completion itself.

use crate::error::Result;
use crate::models::Bundle;
use crate::state_machine::{StepEvent, StepStateMachine, StepStatus};
use tracing::debug;

pub struct StepDependencyResolver;

impl StepDependencyResolver {
    /// Mark `step_number` completed and promote every waiting step whose
    /// prerequisites are now all completed
    ///
    /// Returns the promoted step numbers in step order. Calling it again for an
    /// already completed step promotes nothing.
    pub fn on_step_completed(bundle: &mut Bundle, step_number: u32) -> Result<Vec<u32>> {
        if bundle.step_status(step_number) != Some(StepStatus::Completed) {
            StepStateMachine::transition(bundle, step_number, StepEvent::Complete)?;
        }
        Self::promote_ready(bundle)
    }

    /// Promote every waiting step whose prerequisites are all completed
    pub fn promote_ready(bundle: &mut Bundle) -> Result<Vec<u32>> {
        let candidates: Vec<u32> = bundle
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Waiting)
            .map(|step| step.step_number())
            .filter(|n| bundle.prerequisites_met(*n))
            .collect();

        for step_number in &candidates {
            StepStateMachine::transition(bundle, *step_number, StepEvent::Unlock)?;
        }

        if !candidates.is_empty() {
            debug!(
                bundle_id = %bundle.bundle_id,
                unlocked = ?candidates,
                "Steps unlocked"
            );
        }
        Ok(candidates)
    }
}
