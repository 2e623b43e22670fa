//! Configuration parsing and validation for the PDF particle engine

use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Human-readable run name
    pub name: String,
    /// Mass of a single stochastic particle (kg)
    pub particle_mass: f64,
    /// Global time step (seconds)
    #[serde(default = "default_time_step")]
    pub time_step: f64,
    /// Base RNG seed; per-face seeds derive deterministically from it
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Encoding of persisted particle records
    #[serde(default)]
    pub encoding: EncodingChoice,
    /// Mixing model selection
    #[serde(default)]
    pub mixing: MixingConfig,
    /// Open-boundary patches handled by the engine
    #[serde(default)]
    pub boundaries: Vec<BoundaryPatchConfig>,
}

/// Persisted-record encoding choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingChoice {
    /// Space-separated text records
    #[default]
    Text,
    /// Little-endian binary records
    Binary,
}

impl From<EncodingChoice> for kernel::Encoding {
    fn from(choice: EncodingChoice) -> Self {
        match choice {
            EncodingChoice::Text => kernel::Encoding::Text,
            EncodingChoice::Binary => kernel::Encoding::Binary,
        }
    }
}

/// Mixing model selection and constant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixingConfig {
    /// Registered model name (e.g. "IEM")
    #[serde(default = "default_mixing_model")]
    pub model: String,
    /// Model constant Cmix
    #[serde(default = "default_cmix")]
    pub cmix: f64,
}

impl Default for MixingConfig {
    fn default() -> Self {
        Self {
            model: default_mixing_model(),
            cmix: default_cmix(),
        }
    }
}

/// One open-boundary patch entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryPatchConfig {
    /// Mesh patch name this entry selects
    pub patch: String,
    /// In-plane velocity spread policy for sampled velocities
    #[serde(default)]
    pub in_plane_spread: SpreadPolicy,
}

/// Policy for the in-plane (tangential) velocity spread
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadPolicy {
    /// Isotropic estimate from the Reynolds stress field
    #[default]
    Isotropic,
    /// Fixed RMS value, overriding the stress field
    Fixed(f64),
}

impl From<SpreadPolicy> for kernel::InPlaneSpread {
    fn from(policy: SpreadPolicy) -> Self {
        match policy {
            SpreadPolicy::Isotropic => kernel::InPlaneSpread::FromStress,
            SpreadPolicy::Fixed(s) => kernel::InPlaneSpread::Fixed(s),
        }
    }
}

// Default values
fn default_time_step() -> f64 {
    1.0e-3
}

fn default_seed() -> u64 {
    0
}

fn default_mixing_model() -> String {
    "IEM".to_string()
}

fn default_cmix() -> f64 {
    2.0
}

/// Configuration loading and validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was attempted.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid JSON for [`EngineConfig`].
    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// A field value is out of range or inconsistent.
    #[error("invalid config: {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: EngineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.particle_mass.is_finite() || self.particle_mass <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "particle_mass",
                reason: format!("must be finite and > 0, got {}", self.particle_mass),
            });
        }
        if !self.time_step.is_finite() || self.time_step <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "time_step",
                reason: format!("must be finite and > 0, got {}", self.time_step),
            });
        }
        if !self.mixing.cmix.is_finite() || self.mixing.cmix <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "mixing.cmix",
                reason: format!("must be finite and > 0, got {}", self.mixing.cmix),
            });
        }
        if self.mixing.model.is_empty() {
            return Err(ConfigError::Invalid {
                field: "mixing.model",
                reason: "must not be empty".to_string(),
            });
        }

        for boundary in &self.boundaries {
            if boundary.patch.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "boundaries.patch",
                    reason: "patch name must not be empty".to_string(),
                });
            }
            if let SpreadPolicy::Fixed(s) = boundary.in_plane_spread {
                if !s.is_finite() || s < 0.0 {
                    return Err(ConfigError::Invalid {
                        field: "boundaries.in_plane_spread",
                        reason: format!("fixed spread must be finite and >= 0, got {s}"),
                    });
                }
            }
        }
        let mut names: Vec<&str> = self.boundaries.iter().map(|b| b.patch.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.boundaries.len() {
            return Err(ConfigError::Invalid {
                field: "boundaries",
                reason: "patch names must be unique".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> EngineConfig {
        EngineConfig {
            name: "test".to_string(),
            particle_mass: 1.0e-3,
            time_step: default_time_step(),
            seed: default_seed(),
            encoding: EncodingChoice::Text,
            mixing: MixingConfig::default(),
            boundaries: vec![BoundaryPatchConfig {
                patch: "inlet".to_string(),
                in_plane_spread: SpreadPolicy::Isotropic,
            }],
        }
    }

    #[test]
    fn test_validation_particle_mass() {
        let mut config = sample_config();
        config.particle_mass = -1.0;
        assert!(config.validate().is_err());
        config.particle_mass = 1.0e-3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_cmix() {
        let mut config = sample_config();
        config.mixing.cmix = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_duplicate_patches() {
        let mut config = sample_config();
        config.boundaries.push(config.boundaries[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_fixed_spread() {
        let mut config = sample_config();
        config.boundaries[0].in_plane_spread = SpreadPolicy::Fixed(-0.5);
        assert!(config.validate().is_err());
        config.boundaries[0].in_plane_spread = SpreadPolicy::Fixed(0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_json_with_defaults() {
        let json = r#"{
            "name": "channel",
            "particle_mass": 0.001,
            "boundaries": [
                { "patch": "x_min" },
                { "patch": "x_max", "in_plane_spread": { "fixed": 0.1 } }
            ]
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.time_step, default_time_step());
        assert_eq!(config.encoding, EncodingChoice::Text);
        assert_eq!(config.mixing.model, "IEM");
        assert_eq!(
            config.boundaries[1].in_plane_spread,
            SpreadPolicy::Fixed(0.1)
        );
    }
}
