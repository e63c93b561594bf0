use std::ops::Deref;

use alloy_consensus::Header;
use alloy_primitives::{B256, U256};

/// A header together with its keccak hash.
///
/// The hash is computed once at construction; everything downstream (chain graph keys, db keys,
/// penalty reports) reuses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedHeader {
    hash: B256,
    header: Header,
}

impl SealedHeader {
    pub fn new(header: Header) -> Self {
        let hash = header.hash_slow();
        Self { hash, header }
    }

    /// Caller asserts that `hash` is the keccak of the header's RLP encoding.
    pub fn from_parts(hash: B256, header: Header) -> Self {
        Self { hash, header }
    }

    pub fn hash(&self) -> B256 {
        self.hash
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn into_header(self) -> Header {
        self.header
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn difficulty(&self) -> U256 {
        self.header.difficulty
    }
}

impl Deref for SealedHeader {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}
