//! # Orchestration
//!
//! The components that move bundles through production.
//!
//! ## Core Components
//!
//! - **BundleFactory**: materializes bundles and their step states from a cutting output
//! - **StepDependencyResolver**: promotes waiting steps once all prerequisites completed
//! - **WorkClaimCoordinator**: listing, claiming, releasing and completing work units
//! - **ProgressAggregator**: derived bundle and lot completion figures
//! - **RetryPolicy**: exponential backoff for transient store failures
//!
//! ```text
//! CuttingOutput ──> BundleFactory ──> WorkStore <──> WorkClaimCoordinator ──> EventPublisher
//!                                         │                  │
//!                                         │                  └── StepDependencyResolver
//!                                         └──> ProgressAggregator
//! ```

pub mod bundle_factory;
pub mod dependency_resolver;
pub mod progress_aggregator;
pub mod retry;
pub mod work_claim_coordinator;

pub use bundle_factory::BundleFactory;
pub use dependency_resolver::StepDependencyResolver;
pub use progress_aggregator::{LotProgress, ProgressAggregator};
pub use retry::RetryPolicy;
pub use work_claim_coordinator::{AvailableWork, CompletionOutcome, WorkClaimCoordinator};
