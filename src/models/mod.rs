//! # Bundle Production Models
//!
//! Plain data types shared by the registry, factory, coordinator and stores.

pub mod bundle;
pub mod cutting_output;
pub mod operator;
pub mod process_template;
pub mod work_assignment;

// Re-export core models for easy access
pub use bundle::{Bundle, BundleId, StepState};
pub use cutting_output::{ColorSizeBreakdown, CuttingOutput};
pub use operator::OperatorInfo;
pub use process_template::{ProcessStepDefinition, ProcessTemplate, TemplateSet};
pub use work_assignment::{ClaimKey, WorkAssignment, WorkUnit};
