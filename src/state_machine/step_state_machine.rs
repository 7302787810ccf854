use super::{
    errors::{StateMachineError, StateMachineResult},
    events::StepEvent,
    guards::{PiecesReachedGuard, StateGuard, StepDependenciesMetGuard, StepUnassignedGuard},
    states::StepStatus,
};
use crate::models::Bundle;
use tracing::trace;

/// The single transition function for per-step status
///
/// ```text
/// waiting --Unlock--> ready --Claim--> in_progress --Complete--> completed
///                       ^                  |
///                       +-----Release------+
/// ```
pub struct StepStateMachine;

impl StepStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: StepStatus,
        event: &StepEvent,
    ) -> StateMachineResult<StepStatus> {
        let target = match (current_state, event) {
            (StepStatus::Waiting, StepEvent::Unlock) => StepStatus::Ready,
            (StepStatus::Ready, StepEvent::Claim(_)) => StepStatus::InProgress,
            (StepStatus::InProgress, StepEvent::Release) => StepStatus::Ready,
            (StepStatus::InProgress, StepEvent::Complete) => StepStatus::Completed,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Check guards, then move `step_number` of `bundle` to its next status
    ///
    /// Claim attaches the event's assignment; Release and Complete drop it, so
    /// the step carries an assignment exactly while it is in progress.
    pub fn transition(
        bundle: &mut Bundle,
        step_number: u32,
        event: StepEvent,
    ) -> StateMachineResult<StepStatus> {
        let bundle_id = bundle.bundle_id.to_string();
        let current_state = bundle.step_status(step_number).ok_or_else(|| {
            StateMachineError::StepNotFound {
                bundle_id: bundle_id.clone(),
                step_number,
            }
        })?;
        let target_state = Self::determine_target_state(current_state, &event)?;

        Self::check_guards(bundle, step_number, &event)?;

        let step = bundle
            .step_mut(step_number)
            .ok_or(StateMachineError::StepNotFound {
                bundle_id,
                step_number,
            })?;
        step.status = target_state;
        match event {
            StepEvent::Claim(assignment) => step.assignment = Some(assignment),
            StepEvent::Release | StepEvent::Complete => step.assignment = None,
            StepEvent::Unlock => {}
        }

        trace!(
            step_number = step_number,
            from = %current_state,
            to = %target_state,
            "Step transition applied"
        );

        Ok(target_state)
    }

    fn check_guards(bundle: &Bundle, step_number: u32, event: &StepEvent) -> StateMachineResult<()> {
        match event {
            StepEvent::Unlock => StepDependenciesMetGuard.check(bundle, step_number)?,
            StepEvent::Claim(_) => StepUnassignedGuard.check(bundle, step_number)?,
            StepEvent::Complete => PiecesReachedGuard.check(bundle, step_number)?,
            StepEvent::Release => {}
        }
        Ok(())
    }
}
