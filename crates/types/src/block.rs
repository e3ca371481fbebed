//! Blocks and block headers.

use crate::{BlockId, ChainId, Commit, Hash, Height, NodeId, PartSet};
use sbor::prelude::BasicSbor;
use thiserror::Error;

/// Structural validation failures for headers, blocks and commits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidateError {
    #[error("wrong chain id: expected {expected}, got {got}")]
    WrongChainId { expected: ChainId, got: ChainId },
    #[error("height must be positive")]
    ZeroHeight,
    #[error("missing timestamp")]
    MissingTimestamp,
    #[error("missing {0} hash")]
    MissingHash(&'static str),
    #[error("commit is empty at height {height}")]
    EmptyCommit { height: Height },
    #[error("commit height {commit} does not match header height {header}")]
    CommitHeightMismatch { header: Height, commit: Height },
    #[error("commit certifies block {commit}, header hashes to {header}")]
    CommitHashMismatch { header: Hash, commit: Hash },
}

/// A block header.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct BlockHeader {
    pub chain_id: ChainId,
    pub height: Height,
    /// Millisecond timestamp; strictly increases along the chain.
    pub time: u64,
    /// Identity of the previous block; `None` only at the initial height.
    pub last_block_id: Option<BlockId>,
    pub last_commit_hash: Hash,
    pub data_hash: Hash,
    /// Hash of the validator set that signs this block.
    pub validators_hash: Hash,
    /// Hash of the validator set for the next height.
    pub next_validators_hash: Hash,
    /// State-machine root after the previous block.
    pub app_hash: Hash,
    pub proposer: NodeId,
}

impl BlockHeader {
    /// Hash of the SBOR-encoded header. Doubles as the block hash.
    pub fn hash(&self) -> Hash {
        let encoded = sbor::basic_encode(self).expect("header encoding is infallible");
        Hash::of(&encoded)
    }

    /// Structural validation against the expected chain id.
    pub fn validate_basic(&self, chain_id: &ChainId) -> Result<(), ValidateError> {
        if &self.chain_id != chain_id {
            return Err(ValidateError::WrongChainId {
                expected: chain_id.clone(),
                got: self.chain_id.clone(),
            });
        }
        if self.height.0 == 0 {
            return Err(ValidateError::ZeroHeight);
        }
        if self.time == 0 {
            return Err(ValidateError::MissingTimestamp);
        }
        if self.validators_hash.is_zero() {
            return Err(ValidateError::MissingHash("validators"));
        }
        if self.next_validators_hash.is_zero() {
            return Err(ValidateError::MissingHash("next validators"));
        }
        Ok(())
    }
}

/// One entry in the replicated log: a header plus opaque transactions and
/// the commit for the previous block.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Block {
    pub header: BlockHeader,
    pub data: Vec<Vec<u8>>,
    pub last_commit: Commit,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> Height {
        self.header.height
    }

    /// Approximate wire size in bytes.
    pub fn size_bytes(&self) -> usize {
        sbor::basic_encode(self).map(|b| b.len()).unwrap_or(0)
    }

    /// Split the encoded block into fixed-size parts.
    pub fn part_set(&self, part_size: usize) -> Result<PartSet, sbor::EncodeError> {
        let encoded = sbor::basic_encode(self)?;
        Ok(PartSet::from_bytes(&encoded, part_size))
    }
}

/// A header together with the commit that certifies it.
///
/// The unit of trust for light verification: the commit's signatures bind
/// the header, so an adjacent chain of signed headers can be walked without
/// replaying transactions.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct SignedHeader {
    pub header: BlockHeader,
    pub commit: Commit,
}

impl SignedHeader {
    pub fn new(header: BlockHeader, commit: Commit) -> Self {
        SignedHeader { header, commit }
    }

    /// Structural validation: header checks plus commit/header agreement.
    pub fn validate_basic(&self, chain_id: &ChainId) -> Result<(), ValidateError> {
        self.header.validate_basic(chain_id)?;
        self.commit.validate_basic()?;
        if self.commit.height != self.header.height {
            return Err(ValidateError::CommitHeightMismatch {
                header: self.header.height,
                commit: self.commit.height,
            });
        }
        let header_hash = self.header.hash();
        if self.commit.block_id.hash != header_hash {
            return Err(ValidateError::CommitHashMismatch {
                header: header_hash,
                commit: self.commit.block_id.hash,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{make_chain, validator_set};
    use crate::BLOCK_PART_SIZE;

    fn chain_id() -> ChainId {
        ChainId::new("test-chain")
    }

    #[test]
    fn header_hash_changes_with_content() {
        let vals = validator_set(3);
        let chain = make_chain(&chain_id(), 1, 2, &vals);
        assert_ne!(chain[0].0.hash(), chain[1].0.hash());
        assert_eq!(chain[0].0.hash(), chain[0].0.header.hash());
    }

    #[test]
    fn built_chain_passes_validate_basic() {
        let vals = validator_set(3);
        for (block, commit) in make_chain(&chain_id(), 1, 3, &vals) {
            let sh = SignedHeader::new(block.header.clone(), commit);
            sh.validate_basic(&chain_id()).unwrap();
        }
    }

    #[test]
    fn wrong_chain_id_rejected() {
        let vals = validator_set(3);
        let (block, _) = make_chain(&chain_id(), 1, 1, &vals).remove(0);
        assert!(matches!(
            block.header.validate_basic(&ChainId::new("other")),
            Err(ValidateError::WrongChainId { .. })
        ));
    }

    #[test]
    fn commit_for_other_block_rejected() {
        let vals = validator_set(3);
        let mut chain = make_chain(&chain_id(), 1, 2, &vals);
        let (block1, _) = chain.remove(0);
        let (_, commit2) = chain.remove(0);
        let mut commit = commit2;
        commit.height = block1.header.height;
        let sh = SignedHeader::new(block1.header, commit);
        assert!(matches!(
            sh.validate_basic(&chain_id()),
            Err(ValidateError::CommitHashMismatch { .. })
        ));
    }

    #[test]
    fn part_set_covers_block() {
        let vals = validator_set(3);
        let (block, _) = make_chain(&chain_id(), 1, 1, &vals).remove(0);
        let parts = block.part_set(BLOCK_PART_SIZE).unwrap();
        assert!(parts.header().total >= 1);
        assert_eq!(parts.byte_size(), block.size_bytes());
    }
}
