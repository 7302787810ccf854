//! # System Constants
//!
//! Event names and operational limits shared across the bundle production core.

// Re-export state types for convenience
pub use crate::state_machine::StepStatus;

/// Outbound event names published after a successful commit
pub mod events {
    pub const WORK_CLAIMED: &str = "work.claimed";
    pub const WORK_RELEASED: &str = "work.released";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEPS_UNLOCKED: &str = "step.unlocked";
    pub const BUNDLE_COMPLETED: &str = "bundle.completed";
}

/// Groupings of step statuses used by discovery and progress queries
pub mod status_groups {
    use crate::state_machine::StepStatus;

    /// Statuses in which a step still needs an operator
    pub const UNFINISHED_STATES: &[StepStatus] =
        &[StepStatus::Waiting, StepStatus::Ready, StepStatus::InProgress];

    /// Statuses that carry a live work assignment
    pub const ASSIGNED_STATES: &[StepStatus] = &[StepStatus::InProgress];

    /// Statuses that satisfy a dependent step's prerequisite
    pub const DEPENDENCY_SATISFIED_STATES: &[StepStatus] = &[StepStatus::Completed];
}

/// System limits
pub mod system {
    /// Upper bound on steps in one process template
    pub const MAX_TEMPLATE_STEPS: usize = 512;

    /// Upper bound on pieces in a single bundle row of a cutting output
    pub const MAX_BUNDLE_PIECES: u32 = 100_000;

    /// Separator used in bundle numbers `{lot}-{color}-{size}-{seq}`
    pub const BUNDLE_NUMBER_SEPARATOR: char = '-';
}
