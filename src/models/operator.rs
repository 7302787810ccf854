use serde::{Deserialize, Serialize};

/// Operator Directory record used for claim eligibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorInfo {
    pub operator_id: String,
    pub name: String,
    pub machine_types: Vec<String>,
    #[serde(default)]
    pub current_workload: u32,
}

impl OperatorInfo {
    pub fn new(operator_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            operator_id: operator_id.into(),
            name: name.into(),
            machine_types: Vec::new(),
            current_workload: 0,
        }
    }

    pub fn with_machine(mut self, machine_type: impl Into<String>) -> Self {
        self.machine_types.push(machine_type.into());
        self
    }

    /// Machine-compatibility gate
    pub fn can_operate(&self, machine_type: &str) -> bool {
        self.machine_types.iter().any(|m| m == machine_type)
    }
}
