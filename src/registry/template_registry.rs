//! # Process Template Registry
//!
//! Holds one validated, immutable [`ProcessTemplate`] per garment type. Lookups
//! hand out `Arc`s so readers never block registration.
//!
//! A garment type can be published once; a second registration is rejected.
//! Per-bundle price changes go through the coordinator instead.

use crate::config::TemplatesConfig;
use crate::error::{FlowError, Result};
use crate::logging::log_registry_operation;
use crate::models::{ProcessTemplate, TemplateSet};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct ProcessTemplateRegistry {
    templates: DashMap<String, Arc<ProcessTemplate>>,
}

impl ProcessTemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded from the configured template directory, if it exists
    pub fn from_config(config: &TemplatesConfig) -> Result<Self> {
        let registry = Self::new();
        let directory = Path::new(&config.directory);
        if directory.is_dir() {
            registry.load_directory(directory)?;
        } else {
            warn!(
                directory = %directory.display(),
                "Template directory not found, starting with an empty registry"
            );
        }
        Ok(registry)
    }

    /// Validate and publish a template
    pub fn register(&self, template: ProcessTemplate) -> Result<Arc<ProcessTemplate>> {
        template.validate()?;

        match self.templates.entry(template.garment_type.clone()) {
            Entry::Occupied(_) => Err(FlowError::InvalidTemplate(format!(
                "Template for garment type '{}' is already published",
                template.garment_type
            ))),
            Entry::Vacant(slot) => {
                let template = Arc::new(template);
                slot.insert(Arc::clone(&template));
                log_registry_operation(
                    "register",
                    Some(&template.garment_type),
                    Some(template.step_count()),
                    "success",
                    None,
                );
                Ok(template)
            }
        }
    }

    pub fn get_template(&self, garment_type: &str) -> Result<Arc<ProcessTemplate>> {
        self.templates
            .get(garment_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                FlowError::NotFound(format!("No template for garment type '{garment_type}'"))
            })
    }

    pub fn contains(&self, garment_type: &str) -> bool {
        self.templates.contains_key(garment_type)
    }

    /// Registered garment types, sorted
    pub fn garment_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.templates.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Publish every template of a YAML document; nothing is published if any fails
    pub fn load_yaml_str(&self, yaml: &str) -> Result<usize> {
        let set: TemplateSet = serde_yaml::from_str(yaml)?;
        self.load_set(set)
    }

    /// Publish every `*.yaml` / `*.yml` file of a directory as one batch
    pub fn load_directory(&self, directory: impl AsRef<Path>) -> Result<usize> {
        let directory = directory.as_ref();
        let mut files: Vec<PathBuf> = std::fs::read_dir(directory)
            .map_err(|e| {
                FlowError::ConfigurationError(format!(
                    "Cannot read template directory {}: {e}",
                    directory.display()
                ))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        files.sort();

        let mut merged = TemplateSet::new();
        for path in &files {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                FlowError::ConfigurationError(format!("Cannot read {}: {e}", path.display()))
            })?;
            let set: TemplateSet = serde_yaml::from_str(&contents).map_err(|e| {
                FlowError::InvalidTemplate(format!("{}: {e}", path.display()))
            })?;
            for (garment_type, steps) in set {
                if merged.insert(garment_type.clone(), steps).is_some() {
                    return Err(FlowError::InvalidTemplate(format!(
                        "Garment type '{garment_type}' defined more than once in {}",
                        directory.display()
                    )));
                }
            }
            debug!(file = %path.display(), "Read template file");
        }

        let count = self.load_set(merged)?;
        info!(
            directory = %directory.display(),
            files = files.len(),
            templates = count,
            "Loaded process templates"
        );
        Ok(count)
    }

    fn load_set(&self, set: TemplateSet) -> Result<usize> {
        let templates = ProcessTemplate::from_set(set)?;

        if let Some(existing) = templates.iter().find(|t| self.contains(&t.garment_type)) {
            return Err(FlowError::InvalidTemplate(format!(
                "Template for garment type '{}' is already published",
                existing.garment_type
            )));
        }

        let mut published: Vec<String> = Vec::with_capacity(templates.len());
        for template in templates {
            let garment_type = template.garment_type.clone();
            if let Err(err) = self.register(template) {
                for done in &published {
                    self.templates.remove(done);
                }
                return Err(err);
            }
            published.push(garment_type);
        }
        Ok(published.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessStepDefinition;

    const TEMPLATES: &str = r#"
tee:
  - stepNumber: 1
    operation: Shoulder
    machineType: overlock
    pricePerPiece: 0.5
  - stepNumber: 2
    operation: Hem
    machineType: flatlock
    pricePerPiece: 0.75
    dependencies: [1]
polo:
  - stepNumber: 1
    operation: Collar
    machineType: single_needle
    pricePerPiece: 1.5
"#;

    fn tee() -> ProcessTemplate {
        ProcessTemplate::new("tee", vec![ProcessStepDefinition::new(1, "Shoulder", "overlock")])
            .unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let registry = ProcessTemplateRegistry::new();
        registry.register(tee()).unwrap();
        assert_eq!(registry.get_template("tee").unwrap().step_count(), 1);
        assert!(matches!(
            registry.get_template("jacket"),
            Err(FlowError::NotFound(_))
        ));
    }

    #[test]
    fn test_published_template_is_immutable() {
        let registry = ProcessTemplateRegistry::new();
        registry.register(tee()).unwrap();
        let err = registry.register(tee()).unwrap_err();
        assert!(matches!(err, FlowError::InvalidTemplate(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_load_yaml_str() {
        let registry = ProcessTemplateRegistry::new();
        assert_eq!(registry.load_yaml_str(TEMPLATES).unwrap(), 2);
        assert_eq!(registry.garment_types(), vec!["polo", "tee"]);
        let tee = registry.get_template("tee").unwrap();
        assert!(tee.step(2).unwrap().prerequisites.contains(&1));
    }

    #[test]
    fn test_invalid_template_fails_whole_load() {
        let registry = ProcessTemplateRegistry::new();
        let yaml = r#"
good:
  - stepNumber: 1
    operation: Cut
    machineType: cutter
    pricePerPiece: 1.0
bad:
  - stepNumber: 1
    operation: Sew
    machineType: overlock
    pricePerPiece: 1.0
    dependencies: [2]
  - stepNumber: 2
    operation: Hem
    machineType: flatlock
    pricePerPiece: 1.0
"#;
        assert!(registry.load_yaml_str(yaml).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("garments.yaml"), TEMPLATES).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = ProcessTemplateRegistry::new();
        assert_eq!(registry.load_directory(dir.path()).unwrap(), 2);

        let config = TemplatesConfig {
            directory: dir.path().display().to_string(),
        };
        assert_eq!(ProcessTemplateRegistry::from_config(&config).unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_across_files_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), TEMPLATES).unwrap();
        std::fs::write(dir.path().join("b.yml"), TEMPLATES).unwrap();

        let registry = ProcessTemplateRegistry::new();
        assert!(registry.load_directory(dir.path()).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bundled_templates_load() {
        let config = TemplatesConfig {
            directory: concat!(env!("CARGO_MANIFEST_DIR"), "/config/templates").to_string(),
        };
        let registry = ProcessTemplateRegistry::from_config(&config).unwrap();
        assert_eq!(registry.garment_types(), vec!["polo", "tee"]);

        let polo = registry.get_template("polo").unwrap();
        assert_eq!(polo.root_steps().count(), 2);
        assert_eq!(polo.step(3).unwrap().prerequisites.len(), 2);
    }
}
