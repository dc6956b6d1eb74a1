mod codec;
mod message;

pub use codec::{decode_message, encode_message};
pub use message::{PlanEntryWire, SnapshotRecord, SyncMessage, WireTensor, WireValue};
