//! Sparse table of known-good block hashes shipped with the chain identity.
//!
//! A header arriving at a checkpoint height must carry the expected hash; anything else is a
//! wrong chain and is rejected before any seal work is done.

use std::path::Path;

use alloy_primitives::B256;
use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreverifiedHashes {
    /// Spacing between checkpoints; 0 disables the table.
    pub step: u64,
    /// `hashes[i]` is the expected hash at block `(i + 1) * step`.
    pub hashes: Vec<B256>,
}

impl PreverifiedHashes {
    pub fn new(step: u64, hashes: Vec<B256>) -> Self {
        Self { step, hashes }
    }

    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let file =
            std::fs::File::open(path).with_context(|| format!("Opening preverified hashes at {}", path.display()))?;
        serde_yaml::from_reader(file).context("Parsing preverified hashes")
    }

    /// Highest block covered by a checkpoint.
    pub fn height(&self) -> u64 {
        self.step * self.hashes.len() as u64
    }

    /// The expected hash at `block_n`, if `block_n` is a checkpoint height.
    pub fn expected_hash(&self, block_n: u64) -> Option<B256> {
        if self.step == 0 || block_n == 0 || block_n % self.step != 0 {
            return None;
        }
        let index = (block_n / self.step - 1) as usize;
        self.hashes.get(index).copied()
    }

    /// Whether a header at `block_n` with `hash` contradicts the table.
    pub fn contradicts(&self, block_n: u64, hash: B256) -> bool {
        self.expected_hash(block_n).is_some_and(|expected| expected != hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    fn table() -> PreverifiedHashes {
        PreverifiedHashes::new(
            192,
            vec![
                b256!("1111111111111111111111111111111111111111111111111111111111111111"),
                b256!("2222222222222222222222222222222222222222222222222222222222222222"),
            ],
        )
    }

    #[test]
    fn checkpoint_lookup() {
        let table = table();
        assert_eq!(table.height(), 384);
        assert_eq!(
            table.expected_hash(192),
            Some(b256!("1111111111111111111111111111111111111111111111111111111111111111"))
        );
        assert_eq!(
            table.expected_hash(384),
            Some(b256!("2222222222222222222222222222222222222222222222222222222222222222"))
        );
        // Non-checkpoint heights and heights past the table are unconstrained.
        assert_eq!(table.expected_hash(191), None);
        assert_eq!(table.expected_hash(576), None);
        assert_eq!(table.expected_hash(0), None);
    }

    #[test]
    fn contradiction_only_at_checkpoints() {
        let table = table();
        let other = b256!("3333333333333333333333333333333333333333333333333333333333333333");
        assert!(table.contradicts(192, other));
        assert!(!table.contradicts(191, other));
        assert!(!table.contradicts(192, table.expected_hash(192).unwrap()));
    }

    #[test]
    fn disabled_table_never_contradicts() {
        let table = PreverifiedHashes::default();
        assert!(!table.contradicts(192, B256::ZERO));
        assert_eq!(table.height(), 0);
    }
}
