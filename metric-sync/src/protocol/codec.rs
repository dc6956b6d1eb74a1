use crate::error::{Result, SyncError};
use crate::protocol::message::SyncMessage;

/// Serialize a control message.
pub fn encode_message(msg: &SyncMessage) -> Result<Vec<u8>> {
    rkyv::to_bytes::<rkyv::rancor::Error>(msg)
        .map(|bytes| bytes.to_vec())
        .map_err(|e| SyncError::EncodeFailed(e.to_string()))
}

/// Deserialize a control message received from a peer.
///
/// Gathered payloads arrive in plain `Vec<u8>`s with no alignment
/// guarantee, so the bytes are copied into an aligned buffer first.
pub fn decode_message(bytes: &[u8]) -> Result<SyncMessage> {
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<SyncMessage, rkyv::rancor::Error>(&aligned)
        .map_err(|e| SyncError::DecodeFailed(e.to_string()))
}
