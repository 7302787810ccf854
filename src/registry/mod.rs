//! # Registry Infrastructure
//!
//! Read-mostly lookup of published process templates by garment type.

pub mod template_registry;

pub use template_registry::ProcessTemplateRegistry;
