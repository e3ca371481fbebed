//! Block part sets.
//!
//! A block is gossiped and identified in fixed-size parts. The part-set
//! header (count + combined hash) is half of a [`BlockId`]; two nodes agree
//! on a block only if both the block hash and the part-set header match.

use crate::Hash;
use sbor::prelude::BasicSbor;

/// Default size of one block part in bytes.
pub const BLOCK_PART_SIZE: usize = 65_536;

/// Count and combined hash of a block's parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BasicSbor)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Hash,
}

/// Full identity of a block: its hash plus its part-set header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BasicSbor)]
pub struct BlockId {
    pub hash: Hash,
    pub parts: PartSetHeader,
}

/// A block split into parts of at most `part_size` bytes.
#[derive(Debug, Clone)]
pub struct PartSet {
    header: PartSetHeader,
    parts: Vec<Vec<u8>>,
}

impl PartSet {
    /// Split encoded block bytes into parts.
    pub fn from_bytes(bytes: &[u8], part_size: usize) -> Self {
        assert!(part_size > 0, "part size must be positive");
        let parts: Vec<Vec<u8>> = bytes.chunks(part_size).map(<[u8]>::to_vec).collect();

        // Combined hash: hash of the concatenated per-part hashes.
        let mut acc = Vec::with_capacity(parts.len() * 32);
        for part in &parts {
            acc.extend_from_slice(Hash::of(part).as_bytes());
        }
        let header = PartSetHeader {
            total: parts.len() as u32,
            hash: Hash::of(&acc),
        };
        PartSet { header, parts }
    }

    pub fn header(&self) -> PartSetHeader {
        self.header
    }

    pub fn parts(&self) -> &[Vec<u8>] {
        &self.parts
    }

    /// Total byte size across all parts.
    pub fn byte_size(&self) -> usize {
        self.parts.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_expected_part_count() {
        let set = PartSet::from_bytes(&[7u8; 100], 32);
        assert_eq!(set.header().total, 4);
        assert_eq!(set.parts()[3].len(), 4);
        assert_eq!(set.byte_size(), 100);
    }

    #[test]
    fn header_is_content_addressed() {
        let a = PartSet::from_bytes(&[1u8; 64], 32);
        let b = PartSet::from_bytes(&[1u8; 64], 32);
        let c = PartSet::from_bytes(&[2u8; 64], 32);
        assert_eq!(a.header(), b.header());
        assert_ne!(a.header(), c.header());
    }

    #[test]
    fn part_size_changes_header() {
        let a = PartSet::from_bytes(&[1u8; 64], 32);
        let b = PartSet::from_bytes(&[1u8; 64], 16);
        assert_ne!(a.header(), b.header());
    }
}
