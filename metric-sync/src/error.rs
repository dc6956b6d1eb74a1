use crate::types::{DataType, Device, Rank};

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("the current process is not part of the process group: {reason}")]
    InvalidGroup { reason: String },

    #[error("unexpected world size {world_size} while syncing states")]
    WorldSize { world_size: u32 },

    #[error("cannot reconcile buffer metadata at {path}: {reason}")]
    ShapeReconciliation { path: String, reason: String },

    #[error("state structure mismatch at {path}: {reason}")]
    StructuralMismatch { path: String, reason: String },

    #[error("rank {rank} rejected the synchronization: {reason}")]
    PeerValidation { rank: Rank, reason: String },

    #[error("no device mapped for state {name:?}")]
    MissingDevice { name: String },

    #[error("device {device} is not supported by the active adapter")]
    UnsupportedDevice { device: Device },

    #[error("dtype mismatch: expected {expected}, got {actual}")]
    DTypeMismatch {
        expected: DataType,
        actual: DataType,
    },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("{operation} failed at rank {rank}: {reason}")]
    CollectiveFailed {
        operation: &'static str,
        rank: Rank,
        reason: String,
    },

    #[error("object of {size} bytes exceeds the {limit}-byte gather limit")]
    ObjectTooLarge { size: usize, limit: usize },

    #[error("message decode failed: {0}")]
    DecodeFailed(String),

    #[error("message encode failed: {0}")]
    EncodeFailed(String),

    #[error("invalid shape {shape:?}: {reason}")]
    InvalidShape { shape: Vec<usize>, reason: String },

    #[error("number of labels {labels} must be equal to the number of classes {classes}")]
    LabelCountMismatch { labels: usize, classes: usize },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("device adapter error: {message}")]
    DeviceError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SyncError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a `DeviceError` with just a message.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::DeviceError {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `DeviceError` with a message and a source error.
    pub fn device_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::DeviceError {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn structural(path: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::StructuralMismatch {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
