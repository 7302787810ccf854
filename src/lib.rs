#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Garment Flow Core
//!
//! Bundle production core for garment factories: process templates with step
//! dependency graphs, bundle materialization from cutting outputs, and race-free
//! claiming of (bundle, step) work units by concurrent operators.
//!
//! ## Overview
//!
//! A cutting output is split into bundles, one per color/size row. Each bundle
//! carries its own copy of the garment's step graph. Steps move through
//! `waiting -> ready -> in_progress -> completed`; operators claim ready steps
//! for their machines, report finished pieces, and completions unlock dependent
//! steps. Many operators act at once against one shared store, and no unit is
//! ever assigned twice.
//!
//! ## Module Organization
//!
//! - [`models`] - templates, bundles, step states, assignments, cutting outputs
//! - [`state_machine`] - per-step status, events, guards and the transition function
//! - [`store`] - transactional bundle storage (in-memory and PostgreSQL)
//! - [`registry`] - process templates by garment type
//! - [`orchestration`] - bundle factory, dependency resolver, claim coordinator, progress
//! - [`events`] - outbound lifecycle events
//! - [`config`] - configuration loading
//! - [`error`] - structured error handling
//! - [`logging`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use garment_flow::events::EventPublisher;
//! use garment_flow::models::{CuttingOutput, OperatorInfo};
//! use garment_flow::orchestration::{BundleFactory, WorkClaimCoordinator};
//! use garment_flow::registry::ProcessTemplateRegistry;
//! use garment_flow::store::InMemoryWorkStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> garment_flow::Result<()> {
//! let registry = Arc::new(ProcessTemplateRegistry::new());
//! registry.load_directory("config/templates")?;
//!
//! let store = Arc::new(InMemoryWorkStore::new());
//! let factory = BundleFactory::new(store.clone(), registry);
//! let coordinator = WorkClaimCoordinator::new(store, EventPublisher::default());
//!
//! let lot = CuttingOutput::new("LOT42", "ART-7", "polo").with_row("NAVY", "XL", 50);
//! let bundles = factory.create_bundles(&lot).await?;
//!
//! let operator = OperatorInfo::new("op-1", "Asha").with_machine("single_needle");
//! if let Some(unit) = coordinator.list_available_work_for(&operator).await?.next() {
//!     coordinator.claim(&unit.bundle_id, unit.step_number, &operator).await?;
//!     coordinator
//!         .complete_pieces(&unit.bundle_id, unit.step_number, "op-1", unit.pieces)
//!         .await?;
//! }
//! # let _ = bundles;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;
pub mod store;
pub mod validation;

pub use config::{ConfigLoader, FlowConfig};
pub use constants::{status_groups, system};
// Re-export constants events with different name to avoid conflict
pub use constants::events as event_names;
pub use error::{FlowError, Result};
pub use events::{EventPublisher, FlowEvent, PublishedEvent};
pub use models::{
    Bundle, BundleId, ClaimKey, CuttingOutput, OperatorInfo, ProcessStepDefinition,
    ProcessTemplate, StepState, WorkAssignment, WorkUnit,
};
pub use orchestration::{
    BundleFactory, CompletionOutcome, LotProgress, ProgressAggregator, StepDependencyResolver,
    WorkClaimCoordinator,
};
pub use registry::ProcessTemplateRegistry;
pub use state_machine::{StepEvent, StepStatus};
pub use store::{InMemoryWorkStore, WorkStore};
#[cfg(feature = "postgres")]
pub use store::PgWorkStore;
