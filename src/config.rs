//! Solver and logging configuration via TOML files.
//!
//! ```toml
//! [solver]
//! iterations = 1000
//! learning_rate = 0.1
//! seed = 42
//! convergence_loss = 0.01   # optional
//! convergence_window = 10
//! log_every = 100
//!
//! [logging]
//! path = "logs/latte.jsonl"
//! enabled = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use toml::value::Table;
use toml::Value;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("missing required key `{0}`")]
    Missing(&'static str),
    #[error("invalid value: {0}")]
    Invalid(String),
}

/// Training loop parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolverConfig {
    /// Number of forward/backward/update iterations
    pub iterations: usize,
    /// SGD step size
    pub learning_rate: f32,
    /// Seed for weight initialization
    pub seed: u64,
    /// Stop early once the windowed mean loss drops below this value
    pub convergence_loss: Option<f32>,
    /// Iterations averaged for the convergence check
    pub convergence_window: usize,
    /// Emit an `iteration` log event every this many iterations
    pub log_every: usize,
}

impl SolverConfig {
    pub fn new(iterations: usize, learning_rate: f32, seed: u64) -> Self {
        Self {
            iterations,
            learning_rate,
            seed,
            ..Self::default()
        }
    }

    pub fn with_convergence(mut self, loss: f32, window: usize) -> Self {
        self.convergence_loss = Some(loss);
        self.convergence_window = window;
        self
    }

    pub fn with_log_every(mut self, log_every: usize) -> Self {
        self.log_every = log_every;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "learning_rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        if let Some(loss) = self.convergence_loss {
            if !(loss.is_finite() && loss > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "convergence_loss must be positive and finite, got {loss}"
                )));
            }
        }
        if self.convergence_window == 0 {
            return Err(ConfigError::Invalid(
                "convergence_window must be at least 1".into(),
            ));
        }
        if self.log_every == 0 {
            return Err(ConfigError::Invalid("log_every must be at least 1".into()));
        }
        Ok(())
    }

    fn from_table(table: &Table) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let seed = table
            .get("seed")
            .ok_or(ConfigError::Missing("solver.seed"))?;
        let seed = seed
            .as_integer()
            .filter(|v| *v >= 0)
            .ok_or_else(|| ConfigError::Parse("seed must be a non-negative integer".into()))?
            as u64;

        let config = Self {
            iterations: count(table, "iterations")?.unwrap_or(defaults.iterations),
            learning_rate: float(table, "learning_rate")?.unwrap_or(defaults.learning_rate),
            seed,
            convergence_loss: float(table, "convergence_loss")?,
            convergence_window: count(table, "convergence_window")?
                .unwrap_or(defaults.convergence_window),
            log_every: count(table, "log_every")?.unwrap_or(defaults.log_every),
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            learning_rate: 0.1,
            seed: 42,
            convergence_loss: None,
            convergence_window: 10,
            log_every: 100,
        }
    }
}

/// Where JSON line events go, if anywhere.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub enabled: bool,
}

impl LoggingConfig {
    fn from_table(table: &Table) -> Result<Self, ConfigError> {
        let path = match table.get("path") {
            None => None,
            Some(value) => Some(PathBuf::from(value.as_str().ok_or_else(|| {
                ConfigError::Parse("logging.path must be a string".into())
            })?)),
        };
        let enabled = match table.get("enabled") {
            None => true,
            Some(value) => value
                .as_bool()
                .ok_or_else(|| ConfigError::Parse("logging.enabled must be a boolean".into()))?,
        };
        Ok(Self { path, enabled })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: None,
            enabled: true,
        }
    }
}

/// Everything a training run reads from its configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatteConfig {
    pub solver: SolverConfig,
    pub logging: LoggingConfig,
}

impl LatteConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    /// Parses a TOML document. `[solver]` with a `seed` is required.
    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let value: Value =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;

        let solver = section(&value, "solver")?.ok_or(ConfigError::Missing("solver.seed"))?;
        let logging = section(&value, "logging")?;

        Ok(Self {
            solver: SolverConfig::from_table(&solver)?,
            logging: logging
                .map(|table| LoggingConfig::from_table(&table))
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

fn section(value: &Value, name: &str) -> Result<Option<Table>, ConfigError> {
    match value.get(name) {
        None => Ok(None),
        Some(section) => section
            .as_table()
            .cloned()
            .map(Some)
            .ok_or_else(|| ConfigError::Parse(format!("[{name}] must be a table"))),
    }
}

fn count(table: &Table, key: &str) -> Result<Option<usize>, ConfigError> {
    table
        .get(key)
        .map(|value| {
            value
                .as_integer()
                .filter(|v| *v >= 0)
                .map(|v| v as usize)
                .ok_or_else(|| ConfigError::Parse(format!("{key} must be a non-negative integer")))
        })
        .transpose()
}

fn float(table: &Table, key: &str) -> Result<Option<f32>, ConfigError> {
    table
        .get(key)
        .map(|value| {
            if let Some(float) = value.as_float() {
                Ok(float as f32)
            } else if let Some(int) = value.as_integer() {
                Ok(int as f32)
            } else {
                Err(ConfigError::Parse(format!("{key} must be a number")))
            }
        })
        .transpose()
}
