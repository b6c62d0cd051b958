//! Wire-level pieces of the push protocol owned by the client.
//!
//! The transport layer frames and ships opaque bytes; this module defines what goes inside them:
//! the fixed batch header prepended to every pushed buffer, the synchronous request messages and
//! the single-byte status codes returned by workers and the lifecycle manager.

pub mod message;
pub mod status;

pub use message::{
    BATCH_HEADER_SIZE, BatchHeader, PushData, PushDataHandshake, RegionFinish, RegionStart,
    RpcRequest,
};
pub use status::StatusCode;
