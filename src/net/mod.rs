//! Wire protocol and the in-process relay that arbitrates between peers

pub mod protocol;
pub mod relay;

pub use protocol::{decode, encode, ClientMessage, DecodeError, EncodeError, ServerMessage};
pub use relay::LockRelay;
