//! File-like access to a [`MemoryWindow`](ipcmem_window::MemoryWindow).
//!
//! A [`WindowNode`] is what callers see: it opens into [`NodeHandle`]s that carry a file position
//! and implement [`std::io::Read`], [`std::io::Write`] and [`std::io::Seek`]. Nodes are published
//! by name in a [`NodeRegistry`].

mod error;
mod node;
mod registry;

pub use error::{NodeError, Result};
pub use node::{ControlHook, NodeHandle, NodeStats, WindowControl, WindowNode};
pub use registry::NodeRegistry;
