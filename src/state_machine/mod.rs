// State machine module for per-step bundle progress
//
// Every (bundle, step) unit moves through a closed set of statuses. All legal
// moves go through `StepStateMachine::transition`, which checks guards before
// mutating the step.

pub mod errors;
pub mod events;
pub mod guards;
pub mod states;
pub mod step_state_machine;

// Re-export main types for convenient access
pub use errors::{GuardError, StateMachineError};
pub use events::StepEvent;
pub use states::StepStatus;
pub use step_state_machine::StepStateMachine;

// Common traits and utilities
pub use guards::StateGuard;
