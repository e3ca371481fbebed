//! Validators and validator sets.

use crate::{Hash, NodeId};
use sbor::prelude::BasicSbor;

/// One validator: identity, public key bytes and voting power.
///
/// Key material is opaque here; signature verification lives with the
/// crypto layer, not in this crate.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Validator {
    pub id: NodeId,
    pub pub_key: Vec<u8>,
    pub power: u64,
}

/// An ordered set of validators.
///
/// The set's [`hash`](ValidatorSet::hash) commits to the full membership and
/// ordering; block headers reference it via `validators_hash` and
/// `next_validators_hash`.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
}

impl ValidatorSet {
    pub fn new(validators: Vec<Validator>) -> Self {
        ValidatorSet { validators }
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Total voting power of the set.
    pub fn total_power(&self) -> u64 {
        self.validators.iter().map(|v| v.power).sum()
    }

    /// Deterministic hash committing to membership and order.
    pub fn hash(&self) -> Hash {
        let encoded =
            sbor::basic_encode(&self.validators).expect("validator set encoding is infallible");
        Hash::of(&encoded)
    }
}
