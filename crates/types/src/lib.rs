//! Core types for the keystone consensus engine.
//!
//! This crate provides the foundational types used throughout block sync
//! and consensus:
//!
//! - **Primitives**: [`Hash`], [`Height`], [`NodeId`], [`ChainId`]
//! - **Chain types**: [`Block`], [`BlockHeader`], [`Commit`], [`SignedHeader`]
//! - **Validators**: [`Validator`], [`ValidatorSet`]
//! - **Block identity**: [`BlockId`], [`PartSet`], [`PartSetHeader`]
//! - **Replicated state**: [`ChainState`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer. Everything
//! that travels over the wire derives `BasicSbor`.

mod block;
mod commit;
mod hash;
mod identifiers;
mod part_set;
mod state;
mod validator;

pub use block::{Block, BlockHeader, SignedHeader, ValidateError};
pub use commit::{Commit, CommitSig};
pub use hash::{Hash, HexError};
pub use identifiers::{ChainId, Height, NodeId};
pub use part_set::{BlockId, PartSet, PartSetHeader, BLOCK_PART_SIZE};
pub use state::ChainState;
pub use validator::{Validator, ValidatorSet};

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// A deterministic node id from a single marker byte.
    pub fn node_id(marker: u8) -> NodeId {
        NodeId([marker; 20])
    }

    /// A validator set of `n` equal-power validators.
    pub fn validator_set(n: usize) -> ValidatorSet {
        let validators = (0..n)
            .map(|i| Validator {
                id: node_id(i as u8),
                pub_key: vec![i as u8; 32],
                power: 10,
            })
            .collect();
        ValidatorSet::new(validators)
    }

    /// Build a linked chain of `(block, commit)` pairs for heights
    /// `initial_height..initial_height + len`.
    ///
    /// All blocks carry the same validator set; `next_validators_hash` at
    /// height H matches `validators_hash` at H+1, timestamps strictly
    /// increase, and each commit certifies its own block. The result is a
    /// chain that passes the adjacent verification rules.
    pub fn make_chain(
        chain_id: &ChainId,
        initial_height: u64,
        len: u64,
        validators: &ValidatorSet,
    ) -> Vec<(Block, Commit)> {
        let vals_hash = validators.hash();
        let mut out: Vec<(Block, Commit)> = Vec::with_capacity(len as usize);
        let mut last_block_id: Option<BlockId> = None;
        let mut last_commit = Commit::default();

        for i in 0..len {
            let height = Height(initial_height + i);
            let header = BlockHeader {
                chain_id: chain_id.clone(),
                height,
                time: 1_700_000_000_000 + i * 1_000,
                last_block_id,
                last_commit_hash: Hash::of(&last_commit.encode()),
                data_hash: Hash::of(height.0.to_be_bytes().as_slice()),
                validators_hash: vals_hash,
                next_validators_hash: vals_hash,
                app_hash: Hash::of(b"app"),
                proposer: validators.validators()[0].id,
            };
            let block = Block {
                header,
                data: vec![height.0.to_be_bytes().to_vec()],
                last_commit,
            };
            let parts = block.part_set(BLOCK_PART_SIZE).expect("test block encodes");
            let block_id = BlockId {
                hash: block.hash(),
                parts: parts.header(),
            };
            let commit = Commit {
                height,
                block_id,
                signatures: validators
                    .validators()
                    .iter()
                    .map(|v| CommitSig {
                        validator: v.id,
                        timestamp: block.header.time,
                        signature: vec![0xAB; 64],
                    })
                    .collect(),
            };
            last_block_id = Some(block_id);
            last_commit = commit.clone();
            out.push((block, commit));
        }
        out
    }

    /// Initial chain state at genesis (`last_block_height == 0`).
    pub fn genesis_state(chain_id: &ChainId, validators: &ValidatorSet) -> ChainState {
        ChainState {
            chain_id: chain_id.clone(),
            initial_height: Height(1),
            last_block_height: Height(0),
            validators: validators.clone(),
            next_validators: validators.clone(),
        }
    }
}
