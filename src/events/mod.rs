//! # Outbound Events
//!
//! Lifecycle events published by the work claim coordinator after each
//! successful commit. Delivery is at-least-once from a consumer's point of view;
//! every event carries a natural key so consumers can deduplicate.

pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, PublishError, PublishedEvent};
pub use types::FlowEvent;
