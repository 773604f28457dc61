//! Stress run configuration.
//!
//! Configuration is plain JSON; every field has a default, so a file only
//! names what it changes:
//!
//! ```json
//! { "replicas": 6, "network": { "dup_rate": 0.5 } }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Fault rates of the simulated network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Probability of message loss (0.0 - 1.0). Lost messages are
    /// retransmitted once the network drains.
    pub loss_rate: f64,
    /// Probability of message duplication (0.0 - 1.0)
    pub dup_rate: f64,
    /// Probability of message reordering (0.0 - 1.0)
    pub reorder_rate: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            dup_rate: 0.0,
            reorder_rate: 0.0,
        }
    }
}

impl NetworkConfig {
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Default::default()
        }
    }

    pub fn with_dups(dup_rate: f64) -> Self {
        Self {
            dup_rate,
            ..Default::default()
        }
    }

    /// Every fault at once.
    pub fn chaotic() -> Self {
        Self {
            loss_rate: 0.1,
            dup_rate: 0.2,
            reorder_rate: 0.3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    pub replicas: usize,
    pub ops_per_replica: usize,
    /// Local edit phases per run; ops are spread evenly across them.
    pub rounds: usize,
    pub seed: u64,
    pub network: NetworkConfig,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            replicas: 4,
            ops_per_replica: 200,
            rounds: 8,
            seed: 42,
            network: NetworkConfig::chaotic(),
        }
    }
}

impl StressConfig {
    /// Read a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replicas < 2 {
            return Err(ConfigError::Invalid(format!(
                "need at least 2 replicas, got {}",
                self.replicas
            )));
        }
        if self.rounds == 0 {
            return Err(ConfigError::Invalid("rounds must be positive".to_string()));
        }
        let rates = [
            ("loss_rate", self.network.loss_rate),
            ("dup_rate", self.network.dup_rate),
            ("reorder_rate", self.network.reorder_rate),
        ];
        for (name, rate) in rates {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within 0.0..=1.0, got {}",
                    name, rate
                )));
            }
        }
        // A certain loss would never let the network drain.
        if self.network.loss_rate >= 1.0 {
            return Err(ConfigError::Invalid("loss_rate must be below 1.0".to_string()));
        }
        Ok(())
    }

    /// Ops each replica performs in `round`.
    pub fn ops_in_round(&self, round: usize) -> usize {
        let base = self.ops_per_replica / self.rounds;
        let extra = usize::from(round < self.ops_per_replica % self.rounds);
        base + extra
    }
}
