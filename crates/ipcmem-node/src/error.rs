use std::io::{self, SeekFrom};

use ipcmem_window::WindowError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("invalid seek from {from} to {to:?}")]
    InvalidSeek { from: u64, to: SeekFrom },

    #[error("a node named {0:?} is already registered")]
    NameTaken(String),

    #[error("invalid node name {0:?}")]
    InvalidName(String),

    #[error("no node named {0:?} is registered")]
    NotRegistered(String),
}

impl From<NodeError> for io::Error {
    fn from(err: NodeError) -> Self {
        let kind = match &err {
            NodeError::Window(WindowError::OutOfRange { .. }) | NodeError::InvalidSeek { .. } => {
                io::ErrorKind::InvalidInput
            }
            NodeError::NameTaken(_) => io::ErrorKind::AlreadyExists,
            NodeError::NotRegistered(_) => io::ErrorKind::NotFound,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
