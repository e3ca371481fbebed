//! Light-client adjacent verification.

use keystone_types::{Hash, Height, SignedHeader, ValidateError, ValidatorSet};
use thiserror::Error;

/// Why an untrusted header was rejected.
///
/// [`is_peer_fault`](VerifyError::is_peer_fault) separates "the peer served
/// a bad block" from "the caller fed inconsistent inputs"; the driver
/// punishes peers only for the former.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("next validators hash in trusted header is empty")]
    EmptyNextValidatorsHash,

    #[error("headers must be adjacent: trusted height {trusted}, untrusted height {untrusted}")]
    NonAdjacent { trusted: Height, untrusted: Height },

    #[error("untrusted header failed validation: {0}")]
    InvalidHeader(#[from] ValidateError),

    #[error("untrusted header time {untrusted} is not after trusted header time {trusted}")]
    NonIncreasingTime { trusted: u64, untrusted: u64 },

    #[error(
        "untrusted header validators ({header}) do not match the supplied validator set ({supplied}) at height {height}"
    )]
    ValidatorsHashMismatch {
        header: Hash,
        supplied: Hash,
        height: Height,
    },

    #[error(
        "trusted header's next validators ({expected}) do not match untrusted header's validators ({got})"
    )]
    NextValidatorsMismatch { expected: Hash, got: Hash },
}

impl VerifyError {
    /// True when the failure indicts the serving peer rather than the
    /// caller's bookkeeping.
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            VerifyError::NonIncreasingTime { .. }
                | VerifyError::ValidatorsHashMismatch { .. }
                | VerifyError::NextValidatorsMismatch { .. }
        )
    }
}

/// Check that `untrusted` at height X+1 is a valid successor of `trusted`
/// at height X, given the validator set claimed for X+1.
///
/// Pure and deterministic. Signature verification of the untrusted commit
/// against `untrusted_vals` is the caller's responsibility.
pub fn verify_adjacent(
    trusted: &SignedHeader,
    untrusted: &SignedHeader,
    untrusted_vals: &ValidatorSet,
) -> Result<(), VerifyError> {
    if trusted.header.next_validators_hash.is_zero() {
        return Err(VerifyError::EmptyNextValidatorsHash);
    }

    if untrusted.header.height != trusted.header.height.next() {
        return Err(VerifyError::NonAdjacent {
            trusted: trusted.header.height,
            untrusted: untrusted.header.height,
        });
    }

    untrusted.validate_basic(&trusted.header.chain_id)?;

    if untrusted.header.time <= trusted.header.time {
        return Err(VerifyError::NonIncreasingTime {
            trusted: trusted.header.time,
            untrusted: untrusted.header.time,
        });
    }

    let supplied_hash = untrusted_vals.hash();
    if untrusted.header.validators_hash != supplied_hash {
        return Err(VerifyError::ValidatorsHashMismatch {
            header: untrusted.header.validators_hash,
            supplied: supplied_hash,
            height: untrusted.header.height,
        });
    }

    if untrusted.header.validators_hash != trusted.header.next_validators_hash {
        return Err(VerifyError::NextValidatorsMismatch {
            expected: trusted.header.next_validators_hash,
            got: untrusted.header.validators_hash,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_types::test_utils::{make_chain, validator_set};
    use keystone_types::{Block, ChainId, Commit};

    fn chain_id() -> ChainId {
        ChainId::new("verify-test")
    }

    fn signed(block: &Block, commit: &Commit) -> SignedHeader {
        SignedHeader::new(block.header.clone(), commit.clone())
    }

    #[test]
    fn accepts_adjacent_headers() {
        let vals = validator_set(4);
        let chain = make_chain(&chain_id(), 1, 3, &vals);
        for pair in chain.windows(2) {
            let trusted = signed(&pair[0].0, &pair[0].1);
            let untrusted = signed(&pair[1].0, &pair[1].1);
            verify_adjacent(&trusted, &untrusted, &vals).unwrap();
        }
    }

    #[test]
    fn rejects_height_gap_as_logic_error() {
        let vals = validator_set(4);
        let chain = make_chain(&chain_id(), 1, 3, &vals);
        let trusted = signed(&chain[0].0, &chain[0].1);
        let skipped = signed(&chain[2].0, &chain[2].1);

        let err = verify_adjacent(&trusted, &skipped, &vals).unwrap_err();
        assert!(matches!(err, VerifyError::NonAdjacent { .. }));
        assert!(!err.is_peer_fault());
    }

    #[test]
    fn rejects_empty_trusted_next_validators() {
        let vals = validator_set(4);
        let chain = make_chain(&chain_id(), 1, 2, &vals);
        let mut trusted = signed(&chain[0].0, &chain[0].1);
        trusted.header.next_validators_hash = Hash::ZERO;
        let untrusted = signed(&chain[1].0, &chain[1].1);

        let err = verify_adjacent(&trusted, &untrusted, &vals).unwrap_err();
        assert_eq!(err, VerifyError::EmptyNextValidatorsHash);
        assert!(!err.is_peer_fault());
    }

    #[test]
    fn rejects_non_increasing_time_as_peer_fault() {
        let vals = validator_set(4);
        let chain = make_chain(&chain_id(), 1, 2, &vals);
        let mut trusted = signed(&chain[0].0, &chain[0].1);
        trusted.header.time = chain[1].0.header.time;
        let untrusted = signed(&chain[1].0, &chain[1].1);

        let err = verify_adjacent(&trusted, &untrusted, &vals).unwrap_err();
        assert!(matches!(err, VerifyError::NonIncreasingTime { .. }));
        assert!(err.is_peer_fault());
    }

    #[test]
    fn rejects_wrong_supplied_validator_set() {
        let vals = validator_set(4);
        let other_vals = validator_set(5);
        let chain = make_chain(&chain_id(), 1, 2, &vals);
        let trusted = signed(&chain[0].0, &chain[0].1);
        let untrusted = signed(&chain[1].0, &chain[1].1);

        let err = verify_adjacent(&trusted, &untrusted, &other_vals).unwrap_err();
        assert!(matches!(err, VerifyError::ValidatorsHashMismatch { .. }));
        assert!(err.is_peer_fault());
    }

    #[test]
    fn rejects_next_validators_mismatch() {
        let vals = validator_set(4);
        let chain = make_chain(&chain_id(), 1, 2, &vals);
        let mut trusted = signed(&chain[0].0, &chain[0].1);
        trusted.header.next_validators_hash = Hash::of(b"someone else");
        let untrusted = signed(&chain[1].0, &chain[1].1);

        let err = verify_adjacent(&trusted, &untrusted, &vals).unwrap_err();
        assert!(matches!(err, VerifyError::NextValidatorsMismatch { .. }));
        assert!(err.is_peer_fault());
    }

    #[test]
    fn rejects_wrong_chain_id_via_validate_basic() {
        let vals = validator_set(4);
        let chain = make_chain(&chain_id(), 1, 2, &vals);
        let mut trusted = signed(&chain[0].0, &chain[0].1);
        trusted.header.chain_id = ChainId::new("another-chain");
        let untrusted = signed(&chain[1].0, &chain[1].1);

        let err = verify_adjacent(&trusted, &untrusted, &vals).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidHeader(_)));
        assert!(!err.is_peer_fault());
    }

    #[test]
    fn verdict_is_deterministic() {
        let vals = validator_set(4);
        let chain = make_chain(&chain_id(), 1, 2, &vals);
        let trusted = signed(&chain[0].0, &chain[0].1);
        let untrusted = signed(&chain[1].0, &chain[1].1);

        for _ in 0..10 {
            assert_eq!(
                verify_adjacent(&trusted, &untrusted, &vals),
                verify_adjacent(&trusted, &untrusted, &vals)
            );
        }
    }
}
