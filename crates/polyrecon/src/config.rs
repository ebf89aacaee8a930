//! Serializable reconstruction settings.
//!
//! # Example TOML
//!
//! ```toml
//! [refine]
//! angle_threshold_deg = 5.0
//! distance_threshold = 0.01
//!
//! [hypothesis]
//! bbox_padding = 0.05
//!
//! [weights]
//! fitting = 0.43
//! coverage = 0.27
//! complexity = 0.3
//!
//! [solver]
//! backend = "mip"
//! time_limit_secs = 30.0
//! accept_incumbent_on_timeout = true
//! ```
//!
//! Every section and field is optional; missing values take their defaults.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::confidence::ConfidenceParams;
use crate::error::{ReconError, ReconResult};
use crate::hypothesis::HypothesisParams;
use crate::refine::RefineParams;
use crate::selection::Weights;
use crate::solver::{SolverKind, SolverOptions};

/// Solver choice and budgets.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Default: mip
    pub backend: SolverKind,

    /// Wall-clock budget in seconds. `None` means unlimited.
    /// Default: 60
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<f64>,

    /// Search node budget. Default: unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_limit: Option<u64>,

    /// Default: false
    pub accept_incumbent_on_timeout: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: SolverKind::default(),
            time_limit_secs: Some(60.0),
            node_limit: None,
            accept_incumbent_on_timeout: false,
        }
    }
}

impl SolverConfig {
    pub fn with_backend(mut self, backend: SolverKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn validate(&self) -> ReconResult<()> {
        if let Some(t) = self.time_limit_secs
            && (!t.is_finite() || t <= 0.0)
        {
            return Err(ReconError::invalid_parameter(
                "solver.time_limit_secs",
                format!("must be positive, got {}", t),
            ));
        }
        if self.node_limit == Some(0) {
            return Err(ReconError::invalid_parameter(
                "solver.node_limit",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Budgets in the form backends take them.
    pub fn options(&self) -> SolverOptions {
        SolverOptions {
            time_limit: self.time_limit_secs.map(Duration::from_secs_f64),
            node_limit: self.node_limit,
            accept_incumbent_on_timeout: self.accept_incumbent_on_timeout,
        }
    }
}

/// All settings of a reconstruction run.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    pub refine: RefineParams,
    pub hypothesis: HypothesisParams,
    pub confidence: ConfidenceParams,
    pub weights: Weights,
    pub solver: SolverConfig,
}

impl ReconstructionConfig {
    /// Check every section.
    pub fn validate(&self) -> ReconResult<()> {
        self.refine.validate()?;
        self.hypothesis.validate()?;
        self.confidence.validate()?;
        self.weights.validate()?;
        self.solver.validate()
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Serialize to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Errors that can occur when loading or saving configurations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ReconError),
}
