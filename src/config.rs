use std::path::{Path, PathBuf};

use ipcmem_locator::{DeviceTreeLocator, FixedRegion, RegionLocator, DEFAULT_COMPATIBLE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Misc-device name the node is published under unless configured otherwise.
pub const DEFAULT_NODE_NAME: &str = "myIPCMemory";
pub const DEFAULT_DEVICE_PATH: &str = "/dev/mem";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no region source: set region.dtb, or both region.base and region.size")]
    MissingRegion,

    #[error("region.base and region.size must be given together")]
    IncompleteRegion,

    #[error("region.dtb cannot be combined with region.base/region.size")]
    ConflictingRegion,

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Bring-up configuration, normally read from a TOML file.
///
/// ```toml
/// [region]
/// dtb = "board.dtb"
/// compatible = "IPCMemory"
///
/// [node]
/// name = "myIPCMemory"
///
/// [mapping]
/// kind = "device"
/// path = "/dev/mem"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub region: RegionConfig,
    pub node: NodeConfig,
    pub mapping: MappingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegionConfig {
    /// Compatible string of the devicetree node describing the region.
    pub compatible: String,
    /// Flattened devicetree blob to read the region from.
    pub dtb: Option<PathBuf>,
    /// Fixed region, used instead of a devicetree.
    pub base: Option<u64>,
    pub size: Option<u64>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            compatible: DEFAULT_COMPATIBLE.to_string(),
            dtb: None,
            base: None,
            size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NODE_NAME.to_string(),
        }
    }
}

/// How the located region is made accessible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum MappingConfig {
    /// `mmap` a file or device node. `offset` defaults to the region's base address, which is
    /// what `/dev/mem` expects.
    Device {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<u64>,
    },
    /// Zero-filled process memory; contents do not outlive the process.
    Anonymous,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self::Device {
            path: PathBuf::from(DEFAULT_DEVICE_PATH),
            offset: None,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.resolve_relative_to(path.parent().unwrap_or(Path::new("")));
        Ok(config)
    }

    /// Relative file paths in a config file are relative to that file.
    fn resolve_relative_to(&mut self, dir: &Path) {
        if let Some(dtb) = self.region.dtb.as_mut() {
            if dtb.is_relative() {
                *dtb = dir.join(&*dtb);
            }
        }
        if let MappingConfig::Device { path, .. } = &mut self.mapping {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let region = &self.region;
        match (&region.dtb, region.base, region.size) {
            (Some(_), None, None) => {}
            (Some(_), _, _) => return Err(ConfigError::ConflictingRegion),
            (None, Some(_), Some(_)) => {}
            (None, None, None) => return Err(ConfigError::MissingRegion),
            (None, _, _) => return Err(ConfigError::IncompleteRegion),
        }
        if region.compatible.is_empty() {
            return Err(ConfigError::Invalid("region.compatible is empty".to_string()));
        }
        if self.node.name.is_empty() || self.node.name.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "node.name {:?} is not a valid node name",
                self.node.name
            )));
        }
        Ok(())
    }

    /// Builds the locator this config describes.
    pub fn locator(&self) -> Result<Box<dyn RegionLocator>, crate::InitError> {
        self.validate()?;
        let region = &self.region;
        match (&region.dtb, region.base, region.size) {
            (Some(dtb), _, _) => Ok(Box::new(DeviceTreeLocator::from_path(
                dtb,
                region.compatible.clone(),
            )?)),
            (None, Some(base), Some(size)) => Ok(Box::new(FixedRegion { base, size })),
            _ => Err(ConfigError::MissingRegion.into()),
        }
    }
}
