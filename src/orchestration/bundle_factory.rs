//! # Bundle Factory
//!
//! Turns a cutting output into bundles at the cutting-to-sewing handoff: one
//! bundle per color/size row, each with freshly seeded step states copied from
//! the garment's template. The whole cutting output is persisted with a single
//! store call, so either every bundle of the lot appears or none does.

use crate::config::BundlesConfig;
use crate::error::{FlowError, Result};
use crate::logging::log_bundle_operation;
use crate::models::{Bundle, CuttingOutput, ProcessTemplate};
use crate::registry::ProcessTemplateRegistry;
use crate::store::WorkStore;
use crate::validation::validate_cutting_output;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct BundleFactory {
    store: Arc<dyn WorkStore>,
    registry: Arc<ProcessTemplateRegistry>,
    /// Next bundle sequence number; handed out once and never reused
    next_sequence: AtomicU64,
}

impl BundleFactory {
    pub fn new(store: Arc<dyn WorkStore>, registry: Arc<ProcessTemplateRegistry>) -> Self {
        Self::with_config(store, registry, &BundlesConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn WorkStore>,
        registry: Arc<ProcessTemplateRegistry>,
        config: &BundlesConfig,
    ) -> Self {
        Self {
            store,
            registry,
            next_sequence: AtomicU64::new(config.sequence_start),
        }
    }

    /// Sequence number the next bundle will receive
    pub fn peek_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst)
    }

    /// Build bundles for `cutting_output` from `template` without persisting them
    pub fn materialize(
        &self,
        cutting_output: &CuttingOutput,
        template: &ProcessTemplate,
    ) -> Result<Vec<Bundle>> {
        validate_cutting_output(cutting_output)?;
        if cutting_output.garment_type != template.garment_type {
            return Err(FlowError::InvalidTemplate(format!(
                "Cutting output for lot {} is '{}' but the template is for '{}'",
                cutting_output.lot_number, cutting_output.garment_type, template.garment_type
            )));
        }

        let rows = &cutting_output.color_size_breakdown;
        let first = self
            .next_sequence
            .fetch_add(rows.len() as u64, Ordering::SeqCst);

        let bundles = rows
            .iter()
            .zip(first..)
            .map(|(row, sequence)| {
                Bundle::from_template(
                    template,
                    &cutting_output.lot_number,
                    &cutting_output.article_number,
                    &row.color,
                    &row.size,
                    row.pieces,
                    sequence,
                )
            })
            .collect();
        Ok(bundles)
    }

    /// Resolve the garment's template, materialize and persist every bundle atomically
    #[instrument(skip(self, cutting_output), fields(lot_number = %cutting_output.lot_number, garment_type = %cutting_output.garment_type))]
    pub async fn create_bundles(&self, cutting_output: &CuttingOutput) -> Result<Vec<Bundle>> {
        let template = self
            .registry
            .get_template(&cutting_output.garment_type)
            .map_err(|_| {
                FlowError::InvalidTemplate(format!(
                    "No template registered for garment type '{}'",
                    cutting_output.garment_type
                ))
            })?;

        let bundles = self.materialize(cutting_output, &template)?;
        debug!(count = bundles.len(), "Materialized bundles");

        if let Err(err) = self.store.insert_bundles(&bundles).await {
            let err = FlowError::from(err);
            log_bundle_operation(
                "create_bundles",
                &cutting_output.lot_number,
                bundles.len(),
                "failed",
                Some(&err.to_string()),
            );
            return Err(err);
        }

        log_bundle_operation(
            "create_bundles",
            &cutting_output.lot_number,
            bundles.len(),
            "success",
            None,
        );
        Ok(bundles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessStepDefinition;
    use crate::state_machine::StepStatus;
    use crate::store::InMemoryWorkStore;

    fn registry() -> Arc<ProcessTemplateRegistry> {
        let registry = ProcessTemplateRegistry::new();
        registry
            .register(
                ProcessTemplate::new(
                    "tee",
                    vec![
                        ProcessStepDefinition::new(1, "Shoulder", "overlock"),
                        ProcessStepDefinition::new(2, "Hem", "flatlock").with_prerequisites([1]),
                    ],
                )
                .unwrap(),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn output() -> CuttingOutput {
        CuttingOutput::new("LOT7", "ART-3", "tee")
            .with_row("RED", "M", 20)
            .with_row("RED", "L", 15)
    }

    #[tokio::test]
    async fn test_creates_one_bundle_per_row() {
        let store = Arc::new(InMemoryWorkStore::new());
        let factory = BundleFactory::new(store.clone(), registry());

        let bundles = factory.create_bundles(&output()).await.unwrap();
        let ids: Vec<&str> = bundles.iter().map(|b| b.bundle_id.as_str()).collect();
        assert_eq!(ids, vec!["LOT7-RED-M-1", "LOT7-RED-L-2"]);
        assert_eq!(bundles[1].pieces, 15);
        assert_eq!(bundles[0].step_status(1), Some(StepStatus::Ready));
        assert_eq!(bundles[0].step_status(2), Some(StepStatus::Waiting));
        assert_eq!(store.bundle_count(), 2);
    }

    #[tokio::test]
    async fn test_sequence_never_reused() {
        let store = Arc::new(InMemoryWorkStore::new());
        let factory = BundleFactory::with_config(
            store,
            registry(),
            &BundlesConfig {
                sequence_start: 100,
            },
        );
        let first = factory.create_bundles(&output()).await.unwrap();
        let second = factory.create_bundles(&output()).await.unwrap();
        assert_eq!(first[0].sequence, 100);
        assert_eq!(second[0].sequence, 102);
        assert_eq!(factory.peek_sequence(), 104);
    }

    #[tokio::test]
    async fn test_unknown_garment_type_is_invalid_template() {
        let store = Arc::new(InMemoryWorkStore::new());
        let factory = BundleFactory::new(store.clone(), registry());
        let output = CuttingOutput::new("LOT7", "ART-3", "jacket").with_row("RED", "M", 20);

        let err = factory.create_bundles(&output).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidTemplate(_)));
        assert_eq!(store.bundle_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_row_persists_nothing() {
        let store = Arc::new(InMemoryWorkStore::new());
        let factory = BundleFactory::new(store.clone(), registry());
        let output = output().with_row("BLUE", "S", 0);

        assert!(factory.create_bundles(&output).await.is_err());
        assert_eq!(store.bundle_count(), 0);
    }
}
