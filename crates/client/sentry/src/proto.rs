//! Hand-maintained protobuf messages of the `sentry.Sentry` gRPC service.
//!
//! The wire contract is small and stable, so the messages are kept in code instead of going
//! through a build-time protoc pass; tags are part of the contract and must not be renumbered.

/// eth/66 message identifiers as they appear on the gRPC surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageId {
    Status = 0,
    NewBlockHashes = 1,
    NewBlock = 2,
    Transactions = 3,
    GetBlockHeaders = 4,
    BlockHeaders = 5,
    GetBlockBodies = 6,
    BlockBodies = 7,
    NewPooledTransactionHashes = 8,
    GetPooledTransactions = 9,
    PooledTransactions = 10,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum PenaltyKind {
    Kick = 0,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ForkIdData {
    /// 4-byte EIP-2124 CRC.
    #[prost(bytes = "vec", tag = "1")]
    pub hash: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub next: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StatusData {
    #[prost(uint64, tag = "1")]
    pub network_id: u64,
    /// 32-byte big-endian.
    #[prost(bytes = "vec", tag = "2")]
    pub total_difficulty: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub best_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub genesis_hash: Vec<u8>,
    #[prost(message, optional, tag = "5")]
    pub fork_id: Option<ForkIdData>,
    #[prost(uint64, tag = "6")]
    pub max_block: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetStatusReply {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HandShakeReply {
    #[prost(uint32, tag = "1")]
    pub protocol: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PenalizePeerRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub peer_id: Vec<u8>,
    #[prost(enumeration = "PenaltyKind", tag = "2")]
    pub penalty: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PeerMinBlockRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub peer_id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub min_block: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct OutboundMessageData {
    #[prost(enumeration = "MessageId", tag = "1")]
    pub id: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SendMessageByIdRequest {
    #[prost(message, optional, tag = "1")]
    pub data: Option<OutboundMessageData>,
    #[prost(bytes = "vec", tag = "2")]
    pub peer_id: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SendMessageByMinBlockRequest {
    #[prost(message, optional, tag = "1")]
    pub data: Option<OutboundMessageData>,
    #[prost(uint64, tag = "2")]
    pub min_block: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SendMessageToRandomPeersRequest {
    #[prost(message, optional, tag = "1")]
    pub data: Option<OutboundMessageData>,
    #[prost(uint64, tag = "2")]
    pub max_peers: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SentPeers {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub peers: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MessagesRequest {
    #[prost(enumeration = "MessageId", repeated, tag = "1")]
    pub ids: Vec<i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InboundMessage {
    #[prost(enumeration = "MessageId", tag = "1")]
    pub id: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub peer_id: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PeerCountReply {
    #[prost(uint64, tag = "1")]
    pub count: u64,
}
