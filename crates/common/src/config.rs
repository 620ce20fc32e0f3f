use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{MAX_INSTANCE_COUNT, Stride};

/// Largest compute workgroup accepted by default device limits.
pub const MAX_WORKGROUP_SIZE: u32 = 256;

/// Errors from loading or validating a [`GridConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stride must be 3 or 4 components, got {0}")]
    InvalidStride(u32),
    #[error("instance count must be at least 1")]
    EmptyCount,
    #[error("instance count {count} exceeds the supported maximum of {max}")]
    TooManyInstances { count: u32, max: u32 },
    #[error("workgroup size must be within 1..={max}, got {size}")]
    InvalidWorkgroupSize { size: u32, max: u32 },
}

/// Instance grid configuration: how many records, their layout, and how the
/// dispatch is cut into workgroups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Number of instances (N).
    pub instance_count: u32,
    /// Components per position record.
    pub stride: Stride,
    /// Compute workgroup size. Affects performance only.
    pub workgroup_size: u32,
    /// Read the buffer back once after the initial dispatch for diagnostics.
    pub readback_on_init: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            instance_count: 1000,
            stride: Stride::Vec3,
            workgroup_size: 64,
            readback_on_init: true,
        }
    }
}

impl GridConfig {
    /// Config for `instance_count` instances with everything else defaulted.
    pub fn with_count(instance_count: u32) -> Self {
        Self {
            instance_count,
            ..Default::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config: GridConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        serde_json::to_writer_pretty(std::fs::File::create(path)?, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_count == 0 {
            return Err(ConfigError::EmptyCount);
        }
        if self.instance_count > MAX_INSTANCE_COUNT {
            return Err(ConfigError::TooManyInstances {
                count: self.instance_count,
                max: MAX_INSTANCE_COUNT,
            });
        }
        if self.workgroup_size == 0 || self.workgroup_size > MAX_WORKGROUP_SIZE {
            return Err(ConfigError::InvalidWorkgroupSize {
                size: self.workgroup_size,
                max: MAX_WORKGROUP_SIZE,
            });
        }
        Ok(())
    }

    /// Size in bytes of the position buffer this config describes.
    pub fn buffer_bytes(&self) -> u64 {
        self.instance_count as u64 * self.stride.record_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = GridConfig::default();
        assert_eq!(config.instance_count, 1000);
        assert_eq!(config.stride, Stride::Vec3);
        config.validate().unwrap();
        assert_eq!(config.buffer_bytes(), 12_000);
    }

    #[test]
    fn rejects_empty_count() {
        let config = GridConfig::with_count(0);
        assert!(matches!(config.validate(), Err(ConfigError::EmptyCount)));
    }

    #[test]
    fn rejects_oversized_count() {
        let config = GridConfig::with_count(MAX_INSTANCE_COUNT + 1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyInstances { .. })
        ));
    }

    #[test]
    fn rejects_bad_workgroup_size() {
        for size in [0, MAX_WORKGROUP_SIZE + 1] {
            let config = GridConfig {
                workgroup_size: size,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidWorkgroupSize { .. })
            ));
        }
    }

    #[test]
    fn json_file_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("grid.json");
        let config = GridConfig {
            instance_count: 27,
            stride: Stride::Vec4,
            workgroup_size: 8,
            readback_on_init: false,
        };
        config.to_json_file(&path).unwrap();
        let loaded = GridConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("grid.json");
        std::fs::write(&path, r#"{ "instance_count": 8 }"#).unwrap();
        let loaded = GridConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.instance_count, 8);
        assert_eq!(loaded.workgroup_size, 64);
        assert!(loaded.readback_on_init);
    }

    #[test]
    fn invalid_file_contents_fail_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("grid.json");
        std::fs::write(&path, r#"{ "instance_count": 0 }"#).unwrap();
        assert!(matches!(
            GridConfig::from_json_file(&path),
            Err(ConfigError::EmptyCount)
        ));

        std::fs::write(&path, r#"{ "stride": 7 }"#).unwrap();
        assert!(matches!(
            GridConfig::from_json_file(&path),
            Err(ConfigError::Json(_))
        ));
    }
}
