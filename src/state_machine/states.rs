use crate::constants::status_groups::{
    ASSIGNED_STATES, DEPENDENCY_SATISFIED_STATES, UNFINISHED_STATES,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one step of one bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// At least one prerequisite step is not completed yet
    #[default]
    Waiting,
    /// All prerequisites completed, no operator holds the step
    Ready,
    /// An operator holds the live work assignment
    InProgress,
    /// All pieces of the bundle passed this step
    Completed,
}

impl StepStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if an operator may claim a step in this state
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if this is an active state (step is being worked)
    pub fn is_active(&self) -> bool {
        ASSIGNED_STATES.contains(self)
    }

    /// Check if this step satisfies dependencies for other steps
    pub fn satisfies_dependencies(&self) -> bool {
        DEPENDENCY_SATISFIED_STATES.contains(self)
    }

    /// Check if the step still needs an operator
    pub fn is_unfinished(&self) -> bool {
        UNFINISHED_STATES.contains(self)
    }

    /// Status a freshly materialized step starts in
    pub fn initial(has_prerequisites: bool) -> Self {
        if has_prerequisites {
            Self::Waiting
        } else {
            Self::Ready
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "ready" => Ok(Self::Ready),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid step status: {s}")),
        }
    }
}
