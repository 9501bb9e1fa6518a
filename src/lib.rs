//! Shared memory window driver: resolves the region, maps it, and publishes it as a node.
//!
//! Bring-up follows the platform-driver shape:
//! 1. a [`RegionLocator`] resolves `(base, size)` (usually from the devicetree),
//! 2. the region is mapped per [`config::MappingConfig`] and wrapped in a [`MemoryWindow`],
//! 3. a [`WindowNode`] over the window is registered in a [`NodeRegistry`].
//!
//! If any step fails nothing is published. [`IpcMemory::remove`] undoes the registration; the
//! mapping is released once the last handle to the window goes away.

use std::sync::Arc;

use thiserror::Error;

pub mod config;

pub use config::{Config, ConfigError, MappingConfig};
pub use ipcmem_locator::{
    DeviceTreeLocator, FixedRegion, LocateError, RegionDescriptor, RegionLocator,
};
pub use ipcmem_node::{NodeError, NodeHandle, NodeRegistry, WindowNode};
pub use ipcmem_window::{MemoryWindow, Transfer, WindowError};

/// Startup failed; no window or node was made available.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not locate the memory region: {0}")]
    Locate(#[from] LocateError),

    #[error("could not map the memory region: {0}")]
    Map(#[from] WindowError),

    #[error("could not register the node: {0}")]
    Register(#[from] NodeError),
}

/// A probed region: its descriptor and the node publishing it.
#[derive(Debug)]
pub struct IpcMemory {
    region: RegionDescriptor,
    node: Arc<WindowNode>,
}

impl IpcMemory {
    pub fn region(&self) -> &RegionDescriptor {
        &self.region
    }

    pub fn node(&self) -> &Arc<WindowNode> {
        &self.node
    }

    pub fn window(&self) -> &Arc<MemoryWindow> {
        self.node.window()
    }

    /// Withdraws the node from `registry` and drops this handle on the window.
    pub fn remove(self, registry: &NodeRegistry) -> Result<(), NodeError> {
        registry.deregister(self.node.name())?;
        tracing::info!("removed {}", self.region);
        Ok(())
    }
}

/// Locates, maps and registers the region described by `config`.
pub fn probe(config: &Config, registry: &NodeRegistry) -> Result<IpcMemory, InitError> {
    let locator = config.locator().inspect_err(|err| {
        tracing::error!("probe: {err}");
    })?;
    probe_with(&*locator, config, registry)
}

/// Like [`probe`], with an explicit locator; `config.region` is not consulted.
pub fn probe_with(
    locator: &dyn RegionLocator,
    config: &Config,
    registry: &NodeRegistry,
) -> Result<IpcMemory, InitError> {
    let result = bring_up(locator, config, registry);
    if let Err(err) = &result {
        tracing::error!("probe: {err}");
    }
    result
}

fn bring_up(
    locator: &dyn RegionLocator,
    config: &Config,
    registry: &NodeRegistry,
) -> Result<IpcMemory, InitError> {
    let region = locator.locate()?;
    tracing::info!("mapping {region}");

    let window = map_region(&region, &config.mapping)?;

    // Peek at the first two words so a bad mapping shows up in the log right away.
    if let (Ok(w0), Ok(w1)) = (window.read_u32_le(0), window.read_u32_le(4)) {
        tracing::debug!("{}: first words 0x{w0:08x} 0x{w1:08x}", region.node);
    }

    let node = registry.register(WindowNode::new(config.node.name.as_str(), Arc::new(window)))?;
    tracing::info!("{} ready as {:?}", region.node, node.name());

    Ok(IpcMemory { region, node })
}

fn map_region(
    region: &RegionDescriptor,
    mapping: &MappingConfig,
) -> Result<MemoryWindow, WindowError> {
    match mapping {
        MappingConfig::Anonymous => MemoryWindow::anonymous(region.size),
        MappingConfig::Device { path, offset } => {
            MemoryWindow::map_file(path, offset.unwrap_or(region.base), region.size)
        }
    }
}
