//! Configuration Loader
//!
//! Layers, lowest precedence first:
//! 1. built-in defaults
//! 2. `{dir}/garment_flow.yaml` (optional)
//! 3. `{dir}/garment_flow.{environment}.yaml` (optional)
//! 4. `GARMENT_FLOW__SECTION__KEY` environment variables

use super::FlowConfig;
use crate::error::Result;
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FILE_STEM: &str = "garment_flow";
const ENV_PREFIX: &str = "GARMENT_FLOW";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_directory: PathBuf,
    environment: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(Self::default_config_directory())
    }
}

impl ConfigLoader {
    /// Loader for `config_directory` in the detected environment
    pub fn new(config_directory: impl Into<PathBuf>) -> Self {
        Self {
            config_directory: config_directory.into(),
            environment: Self::detect_environment(),
        }
    }

    /// Load with an explicit environment instead of `GARMENT_FLOW_ENV`
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Load from `./config` in the detected environment
    pub fn load() -> Result<FlowConfig> {
        Self::default().build()
    }

    pub fn detect_environment() -> String {
        crate::logging::get_environment()
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn default_config_directory() -> PathBuf {
        PathBuf::from("config")
    }

    /// Merge every layer, deserialize, then validate
    pub fn build(&self) -> Result<FlowConfig> {
        debug!(
            environment = %self.environment,
            directory = %self.config_directory.display(),
            "Loading configuration"
        );

        let base = self.config_directory.join(format!("{FILE_STEM}.yaml"));
        let per_env = self
            .config_directory
            .join(format!("{FILE_STEM}.{}.yaml", self.environment));

        let config: FlowConfig = Config::builder()
            .add_source(Config::try_from(&FlowConfig::default())?)
            .add_source(File::from(base).format(FileFormat::Yaml).required(false))
            .add_source(File::from(per_env).format(FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        info!(
            environment = %self.environment,
            max_attempts = config.claim.max_attempts,
            channel_capacity = config.events.channel_capacity,
            "Configuration loaded successfully"
        );
        Ok(config)
    }
}
