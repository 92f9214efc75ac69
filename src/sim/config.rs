use std::path::Path;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::coherence::Cycle;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cache parameter {name} must be positive")]
    NonPositive { name: &'static str },
    #[error("set index bits ({set_index_bits}) plus block offset bits ({block_offset_bits}) must leave room for a tag in a 32-bit address")]
    AddressOverflow {
        set_index_bits: u32,
        block_offset_bits: u32,
    },
    #[error("at least one core is required")]
    NoCores,
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A config section that can be pulled out of a parsed TOML document,
/// falling back to its defaults when the section is absent.
pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&toml::Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => Self::default(),
        }
    }
}

/// Address split and set geometry of every per-core cache.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct GeometryConfig {
    /// Number of set index bits; the cache has 2^s sets.
    pub set_index_bits: u32,
    /// Lines per set.
    pub associativity: usize,
    /// Number of block offset bits; blocks are 2^b bytes.
    pub block_offset_bits: u32,
}

impl Config for GeometryConfig {}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            set_index_bits: 6,
            associativity: 2,
            block_offset_bits: 5,
        }
    }
}

impl GeometryConfig {
    pub fn num_sets(&self) -> usize {
        1usize << self.set_index_bits
    }

    pub fn block_bytes(&self) -> usize {
        1usize << self.block_offset_bits
    }

    pub fn cache_bytes(&self) -> usize {
        self.num_sets() * self.associativity * self.block_bytes()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.set_index_bits == 0 {
            return Err(ConfigError::NonPositive {
                name: "set_index_bits",
            });
        }
        if self.associativity == 0 {
            return Err(ConfigError::NonPositive {
                name: "associativity",
            });
        }
        if self.block_offset_bits == 0 {
            return Err(ConfigError::NonPositive {
                name: "block_offset_bits",
            });
        }
        if self.set_index_bits + self.block_offset_bits > 31 {
            return Err(ConfigError::AddressOverflow {
                set_index_bits: self.set_index_bits,
                block_offset_bits: self.block_offset_bits,
            });
        }
        Ok(())
    }
}

/// Latency model shared by the bus and every cache.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct TimingConfig {
    /// Cycles for a memory fetch or writeback.
    pub mem_latency: Cycle,
    /// Cycles to move one word between caches.
    pub word_transfer_cycles: Cycle,
    /// Bytes per word.
    pub word_bytes: usize,
}

impl Config for TimingConfig {}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            mem_latency: 100,
            word_transfer_cycles: 2,
            word_bytes: 4,
        }
    }
}

impl TimingConfig {
    /// Cycles to move a whole block cache-to-cache.
    pub fn cache_transfer_cycles(&self, block_bytes: usize) -> Cycle {
        let words = (block_bytes / self.word_bytes.max(1)).max(1);
        self.word_transfer_cycles * words as Cycle
    }
}

/// Protocol variation knobs.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Whether a peer holding a block in E or M answers a BusUpgr with
    /// data before invalidating. Not canonical MESI, but the behaviour of
    /// the system this simulator models.
    pub upgrade_data_response: bool,
}

impl Config for ProtocolConfig {}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            upgrade_data_response: true,
        }
    }
}

/// Top-level run settings.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SimConfig {
    pub num_cores: usize,
    /// Cycle ceiling; a run that reaches it is reported as timed out.
    pub timeout: Cycle,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_cores: 4,
            timeout: 2_147_483_647,
        }
    }
}

/// The assembled configuration of one simulation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConfig {
    pub sim: SimConfig,
    pub geometry: GeometryConfig,
    pub timing: TimingConfig,
    pub protocol: ProtocolConfig,
}

impl SystemConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let value: toml::Value = toml::from_str(text)?;
        for section in ["sim", "geometry", "timing", "protocol"] {
            if value.get(section).is_none() {
                warn!("config section [{section}] not found, using defaults");
            }
        }
        Ok(Self {
            sim: SimConfig::from_section(value.get("sim")),
            geometry: GeometryConfig::from_section(value.get("geometry")),
            timing: TimingConfig::from_section(value.get("timing")),
            protocol: ProtocolConfig::from_section(value.get("protocol")),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sim.num_cores == 0 {
            return Err(ConfigError::NoCores);
        }
        self.geometry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_modelled_system() {
        let config = SystemConfig::default();
        assert_eq!(config.sim.num_cores, 4);
        assert_eq!(config.geometry.num_sets(), 64);
        assert_eq!(config.geometry.block_bytes(), 32);
        assert_eq!(config.timing.mem_latency, 100);
        assert_eq!(config.timing.cache_transfer_cycles(32), 16);
        assert!(config.protocol.upgrade_data_response);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config = SystemConfig::from_toml_str(
            r#"
            [sim]
            num_cores = 2

            [geometry]
            set_index_bits = 1
            associativity = 2
            block_offset_bits = 5

            [protocol]
            upgrade_data_response = false
            "#,
        )
        .unwrap();
        assert_eq!(config.sim.num_cores, 2);
        assert_eq!(config.geometry.num_sets(), 2);
        assert!(!config.protocol.upgrade_data_response);
        // Untouched sections keep their defaults.
        assert_eq!(config.timing.mem_latency, 100);
    }

    #[test]
    fn zero_parameters_are_rejected() {
        let mut config = SystemConfig::default();
        config.geometry.associativity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive {
                name: "associativity"
            })
        ));
    }

    #[test]
    fn oversized_index_split_is_rejected() {
        let mut config = SystemConfig::default();
        config.geometry.set_index_bits = 27;
        config.geometry.block_offset_bits = 5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AddressOverflow { .. })
        ));
    }
}
