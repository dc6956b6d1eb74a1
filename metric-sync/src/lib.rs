pub mod config;
pub mod device;
pub mod error;
mod hash;
pub mod group;
pub mod protocol;
pub mod state;
pub mod sync;
pub mod tensor;
pub mod toolkit;
pub mod types;

pub use config::{SyncConfig, SyncStrategy};
pub use device::{CpuAdapter, DeviceAdapter};
pub use error::{Result, SyncError};
pub use group::{InstrumentedGroup, LocalGroup, ProcessGroup};
pub use state::{PathSegment, Scalar, StateMap, StatePath, StateTree};
pub use sync::{
    BlockingSynchronizer, EntryKind, NoopObserver, ReconciledBuffer, StateSynchronizer,
    SyncObserver, SyncStats, TracingObserver, TraversalEntry, TraversalPlan, reassemble,
    traversal_order,
};
pub use tensor::{Bf16, Element, F16, Tensor};
pub use toolkit::{Metric, classwise_converter};
pub use types::{DataType, Device, Rank};
