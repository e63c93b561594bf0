//! Typed eth/66 wire messages.
//!
//! Every request carries a 64-bit request id which the matching response must echo; payloads are
//! RLP. Only the block-sync subset is modelled in full; transaction gossip ids exist so they can
//! be filtered and discarded.

use alloy_consensus::TxEnvelope;
use alloy_primitives::{Bytes, B256, U256};
use alloy_rlp::{BufMut, Decodable, Encodable, RlpDecodable, RlpDecodableWrapper, RlpEncodable, RlpEncodableWrapper};
use hp_block::{BlockBody, Header};

use crate::proto;

/// Wire message identifier, mirroring [`proto::MessageId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EthMessageId {
    Status,
    NewBlockHashes,
    NewBlock,
    Transactions,
    GetBlockHeaders,
    BlockHeaders,
    GetBlockBodies,
    BlockBodies,
    NewPooledTransactionHashes,
    GetPooledTransactions,
    PooledTransactions,
}

impl From<EthMessageId> for proto::MessageId {
    fn from(id: EthMessageId) -> Self {
        match id {
            EthMessageId::Status => proto::MessageId::Status,
            EthMessageId::NewBlockHashes => proto::MessageId::NewBlockHashes,
            EthMessageId::NewBlock => proto::MessageId::NewBlock,
            EthMessageId::Transactions => proto::MessageId::Transactions,
            EthMessageId::GetBlockHeaders => proto::MessageId::GetBlockHeaders,
            EthMessageId::BlockHeaders => proto::MessageId::BlockHeaders,
            EthMessageId::GetBlockBodies => proto::MessageId::GetBlockBodies,
            EthMessageId::BlockBodies => proto::MessageId::BlockBodies,
            EthMessageId::NewPooledTransactionHashes => proto::MessageId::NewPooledTransactionHashes,
            EthMessageId::GetPooledTransactions => proto::MessageId::GetPooledTransactions,
            EthMessageId::PooledTransactions => proto::MessageId::PooledTransactions,
        }
    }
}

impl From<proto::MessageId> for EthMessageId {
    fn from(id: proto::MessageId) -> Self {
        match id {
            proto::MessageId::Status => EthMessageId::Status,
            proto::MessageId::NewBlockHashes => EthMessageId::NewBlockHashes,
            proto::MessageId::NewBlock => EthMessageId::NewBlock,
            proto::MessageId::Transactions => EthMessageId::Transactions,
            proto::MessageId::GetBlockHeaders => EthMessageId::GetBlockHeaders,
            proto::MessageId::BlockHeaders => EthMessageId::BlockHeaders,
            proto::MessageId::GetBlockBodies => EthMessageId::GetBlockBodies,
            proto::MessageId::BlockBodies => EthMessageId::BlockBodies,
            proto::MessageId::NewPooledTransactionHashes => EthMessageId::NewPooledTransactionHashes,
            proto::MessageId::GetPooledTransactions => EthMessageId::GetPooledTransactions,
            proto::MessageId::PooledTransactions => EthMessageId::PooledTransactions,
        }
    }
}

/// Request origin: either a hash or a block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashOrNumber {
    Hash(B256),
    Number(u64),
}

impl Encodable for HashOrNumber {
    fn encode(&self, out: &mut dyn BufMut) {
        match self {
            Self::Hash(hash) => hash.encode(out),
            Self::Number(number) => number.encode(out),
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::Hash(hash) => hash.length(),
            Self::Number(number) => number.length(),
        }
    }
}

impl Decodable for HashOrNumber {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        // A hash is a 32-byte RLP string; a u64 can never reach that length.
        let first = buf.first().copied().ok_or(alloy_rlp::Error::InputTooShort)?;
        if first == alloy_rlp::EMPTY_STRING_CODE + 32 {
            Ok(Self::Hash(B256::decode(buf)?))
        } else {
            Ok(Self::Number(u64::decode(buf)?))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct GetBlockHeadersParams {
    pub origin: HashOrNumber,
    pub amount: u64,
    pub skip: u64,
    pub reverse: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct GetBlockHeadersMessage {
    pub request_id: u64,
    pub params: GetBlockHeadersParams,
}

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockHeadersMessage {
    pub request_id: u64,
    pub headers: Vec<Header>,
}

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct GetBlockBodiesMessage {
    pub request_id: u64,
    pub hashes: Vec<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockBodiesMessage {
    pub request_id: u64,
    pub bodies: Vec<BlockBody>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockHashAndNumber {
    pub hash: B256,
    pub number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodableWrapper, RlpDecodableWrapper)]
pub struct NewBlockHashesMessage(pub Vec<BlockHashAndNumber>);

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<TxEnvelope>,
    pub ommers: Vec<Header>,
}

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct NewBlockMessage {
    pub block: Block,
    pub total_difficulty: U256,
}

/// The block-sync subset of eth/66, payloads decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EthMessage {
    GetBlockHeaders(GetBlockHeadersMessage),
    BlockHeaders(BlockHeadersMessage),
    GetBlockBodies(GetBlockBodiesMessage),
    BlockBodies(BlockBodiesMessage),
    NewBlockHashes(NewBlockHashesMessage),
    NewBlock(Box<NewBlockMessage>),
}

impl EthMessage {
    pub fn id(&self) -> EthMessageId {
        match self {
            Self::GetBlockHeaders(_) => EthMessageId::GetBlockHeaders,
            Self::BlockHeaders(_) => EthMessageId::BlockHeaders,
            Self::GetBlockBodies(_) => EthMessageId::GetBlockBodies,
            Self::BlockBodies(_) => EthMessageId::BlockBodies,
            Self::NewBlockHashes(_) => EthMessageId::NewBlockHashes,
            Self::NewBlock(_) => EthMessageId::NewBlock,
        }
    }

    pub fn encoded(&self) -> Bytes {
        let mut out = Vec::new();
        match self {
            Self::GetBlockHeaders(msg) => msg.encode(&mut out),
            Self::BlockHeaders(msg) => msg.encode(&mut out),
            Self::GetBlockBodies(msg) => msg.encode(&mut out),
            Self::BlockBodies(msg) => msg.encode(&mut out),
            Self::NewBlockHashes(msg) => msg.encode(&mut out),
            Self::NewBlock(msg) => msg.encode(&mut out),
        }
        out.into()
    }

    pub fn decode(id: EthMessageId, mut data: &[u8]) -> alloy_rlp::Result<Self> {
        let buf = &mut data;
        match id {
            EthMessageId::GetBlockHeaders => Ok(Self::GetBlockHeaders(GetBlockHeadersMessage::decode(buf)?)),
            EthMessageId::BlockHeaders => Ok(Self::BlockHeaders(BlockHeadersMessage::decode(buf)?)),
            EthMessageId::GetBlockBodies => Ok(Self::GetBlockBodies(GetBlockBodiesMessage::decode(buf)?)),
            EthMessageId::BlockBodies => Ok(Self::BlockBodies(BlockBodiesMessage::decode(buf)?)),
            EthMessageId::NewBlockHashes => Ok(Self::NewBlockHashes(NewBlockHashesMessage::decode(buf)?)),
            EthMessageId::NewBlock => Ok(Self::NewBlock(Box::new(NewBlockMessage::decode(buf)?))),
            _ => Err(alloy_rlp::Error::Custom("message id outside the block-sync subset")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hp_block::test_utils::{build_chain, dev_genesis, sample_body};
    use hp_chain_config::ChainConfig;

    fn round_trip(message: EthMessage) {
        let encoded = message.encoded();
        let decoded = EthMessage::decode(message.id(), &encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn get_block_headers_round_trip() {
        round_trip(EthMessage::GetBlockHeaders(GetBlockHeadersMessage {
            request_id: 77,
            params: GetBlockHeadersParams {
                origin: HashOrNumber::Hash(B256::repeat_byte(0xab)),
                amount: 192,
                skip: 0,
                reverse: true,
            },
        }));
        round_trip(EthMessage::GetBlockHeaders(GetBlockHeadersMessage {
            request_id: 78,
            params: GetBlockHeadersParams { origin: HashOrNumber::Number(1_000), amount: 1, skip: 0, reverse: false },
        }));
    }

    #[test]
    fn block_headers_round_trip() {
        let config = ChainConfig::dev();
        let genesis = dev_genesis(&config);
        let headers = build_chain(&config, &genesis, 3).into_iter().map(|sealed| sealed.into_header()).collect();
        round_trip(EthMessage::BlockHeaders(BlockHeadersMessage { request_id: 1, headers }));
    }

    #[test]
    fn block_bodies_round_trip() {
        round_trip(EthMessage::GetBlockBodies(GetBlockBodiesMessage {
            request_id: 5,
            hashes: vec![B256::repeat_byte(1), B256::repeat_byte(2)],
        }));
        round_trip(EthMessage::BlockBodies(BlockBodiesMessage {
            request_id: 5,
            bodies: vec![sample_body(2), BlockBody::default()],
        }));
    }

    #[test]
    fn announcements_round_trip() {
        round_trip(EthMessage::NewBlockHashes(NewBlockHashesMessage(vec![BlockHashAndNumber {
            hash: B256::repeat_byte(9),
            number: 42,
        }])));

        let config = ChainConfig::dev();
        let genesis = dev_genesis(&config);
        let header = build_chain(&config, &genesis, 1).remove(0).into_header();
        round_trip(EthMessage::NewBlock(Box::new(NewBlockMessage {
            block: Block { header, transactions: sample_body(1).transactions, ommers: vec![] },
            total_difficulty: U256::from(1_000_000),
        })));
    }

    #[test]
    fn hash_origin_is_distinguished_from_number() {
        // A number that RLP-encodes to a single high byte must not be mistaken for a hash.
        let mut out = Vec::new();
        HashOrNumber::Number(u64::MAX).encode(&mut out);
        assert!(matches!(HashOrNumber::decode(&mut out.as_slice()).unwrap(), HashOrNumber::Number(u64::MAX)));

        let mut out = Vec::new();
        HashOrNumber::Hash(B256::ZERO).encode(&mut out);
        assert!(matches!(HashOrNumber::decode(&mut out.as_slice()).unwrap(), HashOrNumber::Hash(_)));
    }
}
