//! Commits: aggregated precommit signatures for a block.

use crate::{BlockId, Height, NodeId, ValidateError};
use sbor::prelude::BasicSbor;

/// One validator's signature over a block.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct CommitSig {
    pub validator: NodeId,
    /// Millisecond timestamp at which the signature was produced.
    pub timestamp: u64,
    /// Opaque signature bytes; verified by the crypto layer.
    pub signature: Vec<u8>,
}

/// Aggregated signatures proving a quorum of voting power committed to a
/// block.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Commit {
    pub height: Height,
    pub block_id: BlockId,
    pub signatures: Vec<CommitSig>,
}

impl Commit {
    /// Structural validation. Signature verification is the caller's concern.
    pub fn validate_basic(&self) -> Result<(), ValidateError> {
        if self.height.0 == 0 {
            return Err(ValidateError::ZeroHeight);
        }
        if self.block_id.hash.is_zero() {
            return Err(ValidateError::MissingHash("commit block id"));
        }
        if self.signatures.is_empty() {
            return Err(ValidateError::EmptyCommit { height: self.height });
        }
        Ok(())
    }

    /// SBOR encoding, used for commit hashes in headers.
    pub fn encode(&self) -> Vec<u8> {
        sbor::basic_encode(self).expect("commit encoding is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Hash, PartSetHeader};

    fn commit(height: u64, sigs: usize) -> Commit {
        Commit {
            height: Height(height),
            block_id: BlockId {
                hash: Hash::of(b"block"),
                parts: PartSetHeader {
                    total: 1,
                    hash: Hash::of(b"parts"),
                },
            },
            signatures: (0..sigs)
                .map(|i| CommitSig {
                    validator: NodeId([i as u8; 20]),
                    timestamp: 1,
                    signature: vec![0; 64],
                })
                .collect(),
        }
    }

    #[test]
    fn valid_commit_passes() {
        assert!(commit(5, 3).validate_basic().is_ok());
    }

    #[test]
    fn empty_commit_rejected() {
        assert!(matches!(
            commit(5, 0).validate_basic(),
            Err(ValidateError::EmptyCommit { .. })
        ));
    }

    #[test]
    fn zero_height_rejected() {
        assert!(matches!(
            commit(0, 3).validate_basic(),
            Err(ValidateError::ZeroHeight)
        ));
    }
}
