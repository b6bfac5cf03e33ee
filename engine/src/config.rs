//! Engine configuration.
//!
//! Every field has a default, so an empty TOML file (or none at all) is valid:
//!
//! ```toml
//! max_retained_jobs = 100
//! checksum_algorithm = "blake3"
//! copy_buffer_size = 262144
//! subscriber_buffer = 256
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::checksums::ChecksumAlgorithm;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Jobs kept in the registry before the oldest finished ones are evicted
    pub max_retained_jobs: usize,

    /// Digest used by safe-mode verification
    pub checksum_algorithm: ChecksumAlgorithm,

    /// Chunk size for copying file contents
    pub copy_buffer_size: usize,

    /// Snapshots a subscriber may lag behind before it is dropped
    pub subscriber_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_retained_jobs: 100,
            checksum_algorithm: ChecksumAlgorithm::Blake3,
            copy_buffer_size: 256 * 1024,
            subscriber_buffer: 256,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        Ok(config.normalized())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    /// Clamp values that would make the engine unusable.
    pub fn normalized(mut self) -> Self {
        self.max_retained_jobs = self.max_retained_jobs.max(1);
        self.copy_buffer_size = self.copy_buffer_size.max(4096);
        self.subscriber_buffer = self.subscriber_buffer.max(1);
        self
    }
}
