//! # Process Template Model
//!
//! Per-garment-type step definitions. A template is a DAG whose edges always
//! point from a lower step number to a higher one, so step-number order is a
//! valid topological order and no cycle can be expressed.
//!
//! ## Configuration format
//!
//! ```yaml
//! polo:
//!   - stepNumber: 1
//!     operation: Collar
//!     machineType: single_needle
//!     pricePerPiece: 1.5
//!     estimatedMinutes: 2.0
//!     skillLevel: skilled
//!     dependencies: []
//!     canRunParallel: true
//! ```

use crate::error::Result;
use crate::validation;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Garment type → raw step list, as read from template configuration
pub type TemplateSet = BTreeMap<String, Vec<ProcessStepDefinition>>;

/// One machine-specific processing action in a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStepDefinition {
    pub step_number: u32,
    pub operation: String,
    pub machine_type: String,
    pub price_per_piece: f64,
    #[serde(default)]
    pub estimated_minutes: f64,
    #[serde(default)]
    pub skill_level: String,
    #[serde(default, alias = "dependencies")]
    pub prerequisites: BTreeSet<u32>,
    #[serde(default)]
    pub can_run_parallel: bool,
}

impl ProcessStepDefinition {
    pub fn new(step_number: u32, operation: impl Into<String>, machine_type: impl Into<String>) -> Self {
        Self {
            step_number,
            operation: operation.into(),
            machine_type: machine_type.into(),
            price_per_piece: 0.0,
            estimated_minutes: 0.0,
            skill_level: String::new(),
            prerequisites: BTreeSet::new(),
            can_run_parallel: false,
        }
    }

    pub fn with_prerequisites(mut self, prerequisites: impl IntoIterator<Item = u32>) -> Self {
        self.prerequisites = prerequisites.into_iter().collect();
        self
    }

    pub fn with_price(mut self, price_per_piece: f64) -> Self {
        self.price_per_piece = price_per_piece;
        self
    }

    pub fn with_estimated_minutes(mut self, estimated_minutes: f64) -> Self {
        self.estimated_minutes = estimated_minutes;
        self
    }

    pub fn with_skill_level(mut self, skill_level: impl Into<String>) -> Self {
        self.skill_level = skill_level.into();
        self
    }

    pub fn parallel(mut self) -> Self {
        self.can_run_parallel = true;
        self
    }

    pub fn is_root(&self) -> bool {
        self.prerequisites.is_empty()
    }
}

/// Validated, immutable step graph for one garment type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTemplate {
    pub garment_type: String,
    pub steps: Vec<ProcessStepDefinition>,
}

impl ProcessTemplate {
    /// Build a template, sorting steps by step number and validating the graph
    pub fn new(garment_type: impl Into<String>, mut steps: Vec<ProcessStepDefinition>) -> Result<Self> {
        steps.sort_by_key(|step| step.step_number);
        let template = Self {
            garment_type: garment_type.into(),
            steps,
        };
        template.validate()?;
        Ok(template)
    }

    /// Build every template of a configuration set
    pub fn from_set(set: TemplateSet) -> Result<Vec<Self>> {
        set.into_iter()
            .map(|(garment_type, steps)| Self::new(garment_type, steps))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate_template(&self.garment_type, &self.steps)
    }

    pub fn step(&self, step_number: u32) -> Option<&ProcessStepDefinition> {
        self.steps
            .binary_search_by_key(&step_number, |step| step.step_number)
            .ok()
            .map(|idx| &self.steps[idx])
    }

    /// Steps that start out ready on every new bundle
    pub fn root_steps(&self) -> impl Iterator<Item = &ProcessStepDefinition> {
        self.steps.iter().filter(|step| step.is_root())
    }

    /// Steps naming `step_number` as a direct prerequisite
    pub fn dependents_of(&self, step_number: u32) -> impl Iterator<Item = &ProcessStepDefinition> {
        self.steps
            .iter()
            .filter(move |step| step.prerequisites.contains(&step_number))
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Sum of piece rates across all steps, per piece
    pub fn total_price_per_piece(&self) -> f64 {
        self.steps.iter().map(|step| step.price_per_piece).sum()
    }
}
