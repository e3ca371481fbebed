//! Block-sync wire messages and their codec.
//!
//! # Wire Format
//!
//! ```text
//! [tag: u8][payload: SBOR-encoded message]
//! ```
//!
//! The tag selects the message type; the payload is the SBOR encoding of
//! the corresponding struct. Unknown tags are a decode error (and a peer
//! error at the reactor).

use keystone_types::{Block, Commit, Height};
use sbor::prelude::BasicSbor;
use thiserror::Error;

/// Channel identifier for block-sync traffic.
pub const BLOCK_SYNC_CHANNEL_ID: u8 = 0x40;

/// Per-message size cap on the block-sync channel, framing included.
pub const MAX_MSG_SIZE: usize = 16 * 1024 * 1024;

const TAG_BLOCK_REQUEST: u8 = 1;
const TAG_NO_BLOCK_RESPONSE: u8 = 2;
const TAG_BLOCK_RESPONSE: u8 = 3;
const TAG_STATUS_REQUEST: u8 = 4;
const TAG_STATUS_RESPONSE: u8 = 5;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message is empty")]
    Empty,

    #[error("unknown message tag: {0}")]
    UnknownTag(u8),

    #[error("message size {size} exceeds cap {max}")]
    TooLarge { size: usize, max: usize },

    #[error("SBOR decode error: {0}")]
    Decode(String),

    #[error("SBOR encode error: {0}")]
    Encode(String),
}

/// Ask a peer for the block at `height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct BlockRequest {
    pub height: Height,
}

/// The peer does not have the block at `height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct NoBlockResponse {
    pub height: Height,
}

/// A block together with the commit that certifies it.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct BlockResponse {
    pub block: Block,
    pub commit: Commit,
}

/// Ask a peer for its available height range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BasicSbor)]
pub struct StatusRequest;

/// A peer's advertised `[base, height]` range of servable blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct StatusResponse {
    pub height: Height,
    pub base: Height,
}

/// All messages on the block-sync channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSyncMessage {
    BlockRequest(BlockRequest),
    NoBlockResponse(NoBlockResponse),
    BlockResponse(Box<BlockResponse>),
    StatusRequest(StatusRequest),
    StatusResponse(StatusResponse),
}

impl BlockSyncMessage {
    /// Wire tag for this message.
    pub fn tag(&self) -> u8 {
        match self {
            BlockSyncMessage::BlockRequest(_) => TAG_BLOCK_REQUEST,
            BlockSyncMessage::NoBlockResponse(_) => TAG_NO_BLOCK_RESPONSE,
            BlockSyncMessage::BlockResponse(_) => TAG_BLOCK_RESPONSE,
            BlockSyncMessage::StatusRequest(_) => TAG_STATUS_REQUEST,
            BlockSyncMessage::StatusResponse(_) => TAG_STATUS_RESPONSE,
        }
    }

    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            BlockSyncMessage::BlockRequest(_) => "BlockRequest",
            BlockSyncMessage::NoBlockResponse(_) => "NoBlockResponse",
            BlockSyncMessage::BlockResponse(_) => "BlockResponse",
            BlockSyncMessage::StatusRequest(_) => "StatusRequest",
            BlockSyncMessage::StatusResponse(_) => "StatusResponse",
        }
    }
}

/// Encode a message to wire format.
pub fn encode_message(message: &BlockSyncMessage) -> Result<Vec<u8>, CodecError> {
    let payload = match message {
        BlockSyncMessage::BlockRequest(m) => {
            sbor::basic_encode(m).map_err(|e| CodecError::Encode(format!("{e:?}")))?
        }
        BlockSyncMessage::NoBlockResponse(m) => {
            sbor::basic_encode(m).map_err(|e| CodecError::Encode(format!("{e:?}")))?
        }
        BlockSyncMessage::BlockResponse(m) => {
            sbor::basic_encode(m.as_ref()).map_err(|e| CodecError::Encode(format!("{e:?}")))?
        }
        BlockSyncMessage::StatusRequest(m) => {
            sbor::basic_encode(m).map_err(|e| CodecError::Encode(format!("{e:?}")))?
        }
        BlockSyncMessage::StatusResponse(m) => {
            sbor::basic_encode(m).map_err(|e| CodecError::Encode(format!("{e:?}")))?
        }
    };

    let mut bytes = Vec::with_capacity(1 + payload.len());
    bytes.push(message.tag());
    bytes.extend(payload);

    if bytes.len() > MAX_MSG_SIZE {
        return Err(CodecError::TooLarge {
            size: bytes.len(),
            max: MAX_MSG_SIZE,
        });
    }
    Ok(bytes)
}

/// Decode a message from wire format.
pub fn decode_message(data: &[u8]) -> Result<BlockSyncMessage, CodecError> {
    if data.is_empty() {
        return Err(CodecError::Empty);
    }
    if data.len() > MAX_MSG_SIZE {
        return Err(CodecError::TooLarge {
            size: data.len(),
            max: MAX_MSG_SIZE,
        });
    }

    let payload = &data[1..];
    let decode_err = |e| CodecError::Decode(format!("{e:?}"));
    match data[0] {
        TAG_BLOCK_REQUEST => {
            let m: BlockRequest = sbor::basic_decode(payload).map_err(decode_err)?;
            Ok(BlockSyncMessage::BlockRequest(m))
        }
        TAG_NO_BLOCK_RESPONSE => {
            let m: NoBlockResponse = sbor::basic_decode(payload).map_err(decode_err)?;
            Ok(BlockSyncMessage::NoBlockResponse(m))
        }
        TAG_BLOCK_RESPONSE => {
            let m: BlockResponse = sbor::basic_decode(payload).map_err(decode_err)?;
            Ok(BlockSyncMessage::BlockResponse(Box::new(m)))
        }
        TAG_STATUS_REQUEST => {
            let m: StatusRequest = sbor::basic_decode(payload).map_err(decode_err)?;
            Ok(BlockSyncMessage::StatusRequest(m))
        }
        TAG_STATUS_RESPONSE => {
            let m: StatusResponse = sbor::basic_decode(payload).map_err(decode_err)?;
            Ok(BlockSyncMessage::StatusResponse(m))
        }
        tag => Err(CodecError::UnknownTag(tag)),
    }
}

/// Static properties of a transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub id: u8,
    pub priority: u8,
    pub send_queue_capacity: usize,
    pub recv_buffer_capacity: usize,
    pub recv_message_capacity: usize,
}

impl ChannelDescriptor {
    /// Descriptor for the block-sync channel.
    pub fn block_sync() -> Self {
        ChannelDescriptor {
            id: BLOCK_SYNC_CHANNEL_ID,
            priority: 5,
            send_queue_capacity: 1000,
            recv_buffer_capacity: 1024,
            recv_message_capacity: MAX_MSG_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_types::test_utils::{make_chain, validator_set};
    use keystone_types::ChainId;

    #[test]
    fn encode_decode_block_request() {
        let msg = BlockSyncMessage::BlockRequest(BlockRequest { height: Height(42) });
        let bytes = encode_message(&msg).unwrap();
        assert_eq!(bytes[0], TAG_BLOCK_REQUEST);

        match decode_message(&bytes).unwrap() {
            BlockSyncMessage::BlockRequest(req) => assert_eq!(req.height, Height(42)),
            other => panic!("expected BlockRequest, got {}", other.type_name()),
        }
    }

    #[test]
    fn encode_decode_block_response() {
        let vals = validator_set(3);
        let (block, commit) = make_chain(&ChainId::new("t"), 1, 1, &vals).remove(0);
        let msg = BlockSyncMessage::BlockResponse(Box::new(BlockResponse {
            block: block.clone(),
            commit,
        }));

        let bytes = encode_message(&msg).unwrap();
        match decode_message(&bytes).unwrap() {
            BlockSyncMessage::BlockResponse(resp) => {
                assert_eq!(resp.block.hash(), block.hash());
                assert_eq!(resp.commit.height, block.height());
            }
            other => panic!("expected BlockResponse, got {}", other.type_name()),
        }
    }

    #[test]
    fn encode_decode_status_messages() {
        let bytes = encode_message(&BlockSyncMessage::StatusRequest(StatusRequest)).unwrap();
        assert!(matches!(
            decode_message(&bytes).unwrap(),
            BlockSyncMessage::StatusRequest(_)
        ));

        let bytes = encode_message(&BlockSyncMessage::StatusResponse(StatusResponse {
            height: Height(10),
            base: Height(1),
        }))
        .unwrap();
        match decode_message(&bytes).unwrap() {
            BlockSyncMessage::StatusResponse(status) => {
                assert_eq!(status.height, Height(10));
                assert_eq!(status.base, Height(1));
            }
            other => panic!("expected StatusResponse, got {}", other.type_name()),
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        let result = decode_message(&[99, 1, 2, 3]);
        assert!(matches!(result, Err(CodecError::UnknownTag(99))));
    }

    #[test]
    fn empty_message_rejected() {
        assert!(matches!(decode_message(&[]), Err(CodecError::Empty)));
    }

    #[test]
    fn truncated_payload_rejected() {
        let vals = validator_set(3);
        let (block, commit) = make_chain(&ChainId::new("t"), 1, 1, &vals).remove(0);
        let msg = BlockSyncMessage::BlockResponse(Box::new(BlockResponse { block, commit }));
        let bytes = encode_message(&msg).unwrap();
        assert!(matches!(
            decode_message(&bytes[..bytes.len() / 2]),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn channel_descriptor_numbers() {
        let desc = ChannelDescriptor::block_sync();
        assert_eq!(desc.id, 0x40);
        assert_eq!(desc.priority, 5);
        assert_eq!(desc.send_queue_capacity, 1000);
        assert_eq!(desc.recv_buffer_capacity, 1024);
    }
}
