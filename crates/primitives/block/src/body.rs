use alloy_consensus::proofs::{calculate_ommers_root, calculate_transaction_root};
use alloy_consensus::{Header, TxEnvelope};
use alloy_primitives::B256;
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// Block body as it travels on the wire and sits in the store: transactions plus ommer headers.
///
/// Pre-merge encoding; there is no withdrawals list.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockBody {
    pub transactions: Vec<TxEnvelope>,
    pub ommers: Vec<Header>,
}

impl BlockBody {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.ommers.is_empty()
    }

    /// Recomputed transactions trie root.
    pub fn transactions_root(&self) -> B256 {
        calculate_transaction_root(&self.transactions)
    }

    /// Recomputed ommers list hash.
    pub fn ommers_hash(&self) -> B256 {
        calculate_ommers_root(&self.ommers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::constants::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH};

    #[test]
    fn empty_body_roots_match_constants() {
        let body = BlockBody::default();
        assert_eq!(body.transactions_root(), EMPTY_ROOT_HASH);
        assert_eq!(body.ommers_hash(), EMPTY_OMMER_ROOT_HASH);
    }

    #[test]
    fn rlp_round_trip() {
        let body = BlockBody { transactions: vec![], ommers: vec![Header { number: 3, ..Default::default() }] };
        let mut out = Vec::new();
        alloy_rlp::Encodable::encode(&body, &mut out);
        let back: BlockBody = alloy_rlp::Decodable::decode(&mut out.as_slice()).unwrap();
        assert_eq!(back, body);
    }
}
