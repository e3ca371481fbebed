//! Network messages for the keystone block-sync channel.
//!
//! Defines the five wire messages exchanged during fast catch-up, the
//! tag-byte codec that frames them, and the transport-facing envelope and
//! peer-update types.

mod blocksync;
mod envelope;

pub use blocksync::{
    decode_message, encode_message, BlockRequest, BlockResponse, BlockSyncMessage, ChannelDescriptor,
    CodecError, NoBlockResponse, StatusRequest, StatusResponse, BLOCK_SYNC_CHANNEL_ID, MAX_MSG_SIZE,
};
pub use envelope::{Envelope, PeerStatus, PeerUpdate};
