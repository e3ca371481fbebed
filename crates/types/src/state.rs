//! Replicated-machine state as seen by block sync.

use crate::{ChainId, Height, ValidatorSet};
use sbor::prelude::BasicSbor;

/// The slice of replicated state that block sync needs: where the chain
/// starts, where the local copy ends, and which validator sets govern the
/// next blocks.
///
/// Loaded from the state store at startup and evolved by
/// `apply_block` as blocks are executed.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ChainState {
    pub chain_id: ChainId,
    /// First height of this chain (1 for fresh chains, later for forks
    /// started from a snapshot).
    pub initial_height: Height,
    /// Height of the last applied block; `Height(0)` if none.
    pub last_block_height: Height,
    /// Validator set signing the block at `last_block_height + 1`.
    pub validators: ValidatorSet,
    /// Validator set for the height after that.
    pub next_validators: ValidatorSet,
}

impl ChainState {
    /// The first height block sync should fetch given this state.
    pub fn sync_start_height(&self) -> Height {
        if self.last_block_height.0 == 0 {
            self.initial_height
        } else {
            self.last_block_height.next()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{genesis_state, validator_set};

    #[test]
    fn start_height_at_genesis_is_initial() {
        let vals = validator_set(2);
        let state = genesis_state(&ChainId::new("t"), &vals);
        assert_eq!(state.sync_start_height(), Height(1));
    }

    #[test]
    fn start_height_resumes_after_last_block() {
        let vals = validator_set(2);
        let mut state = genesis_state(&ChainId::new("t"), &vals);
        state.last_block_height = Height(7);
        assert_eq!(state.sync_start_height(), Height(8));
    }
}
