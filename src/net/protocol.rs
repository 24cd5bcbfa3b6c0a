use serde::{Deserialize, Serialize};

use crate::lock::types::{Lock, PlayerId};
use crate::position::snapshot::PositionSnapshot;

/// Messages from a peer to the lock arbiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Request a lock; `force` takes it over from any current owner
    LockAcquire { lock: Lock, force: bool },
    /// Give up a lock
    LockRelease { lock: Lock },
    /// Ask for the complete lock table
    LockListRequest,
    /// Position of a vessel the sender simulates
    Position(PositionSnapshot),
}

/// Messages from the lock arbiter to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Lock granted (broadcast to every peer)
    LockAcquired { lock: Lock, force: bool },
    /// Request refused, `owner` keeps the lock (sent to the requester only)
    LockDenied { lock: Lock, owner: PlayerId },
    /// Lock released (broadcast to every peer)
    LockReleased { lock: Lock },
    /// Complete lock table, reply to [`ClientMessage::LockListRequest`]
    LockList { locks: Vec<Lock> },
    /// Position relayed from the vessel's updater
    Position(PositionSnapshot),
}

impl ServerMessage {
    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::LockAcquired { .. } => "lock_acquired",
            ServerMessage::LockDenied { .. } => "lock_denied",
            ServerMessage::LockReleased { .. } => "lock_released",
            ServerMessage::LockList { .. } => "lock_list",
            ServerMessage::Position(_) => "position",
        }
    }
}

/// Encode a message using bincode.
/// Uses legacy config for fixed-size integers.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy()).map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
