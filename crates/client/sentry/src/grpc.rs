//! gRPC implementation of [`SentryClient`].
//!
//! The client is a thin wrapper over a shared HTTP/2 channel; every call clones the channel, so
//! the handle is cheap to share and safe for concurrent use.

use futures::stream::BoxStream;
use futures::StreamExt;
use hp_chain_config::ForkId;
use http::uri::PathAndQuery;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::api::{InboundMessage, Penalty, PeerId, SentryClient, Status};
use crate::eth::{EthMessage, EthMessageId};
use crate::{proto, SentryError};

#[derive(Clone)]
pub struct SentryGrpcClient {
    inner: Grpc<Channel>,
}

impl SentryGrpcClient {
    /// Dials the sentry endpoint. The connection is lazy on failure-tolerant paths; a first
    /// unreachable dial is reported here.
    pub async fn connect(url: &str) -> Result<Self, SentryError> {
        let endpoint = Endpoint::from_shared(url.to_string())?;
        let channel = endpoint.connect().await?;
        Ok(Self { inner: Grpc::new(channel) })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, SentryError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.inner.clone();
        grpc.ready().await.map_err(SentryError::Transport)?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc.unary(Request::new(request), PathAndQuery::from_static(path), codec).await?;
        Ok(response.into_inner())
    }

    async fn send_message(
        &self,
        message: &EthMessage,
        build: impl FnOnce(proto::OutboundMessageData) -> SendRequest,
    ) -> Result<Vec<PeerId>, SentryError> {
        let data = proto::OutboundMessageData {
            id: proto::MessageId::from(message.id()) as i32,
            data: message.encoded().to_vec(),
        };
        let sent = match build(data) {
            SendRequest::ById(req) => self.unary::<_, proto::SentPeers>("/sentry.Sentry/SendMessageById", req).await?,
            SendRequest::ByMinBlock(req) => {
                self.unary::<_, proto::SentPeers>("/sentry.Sentry/SendMessageByMinBlock", req).await?
            }
            SendRequest::Random(req) => {
                self.unary::<_, proto::SentPeers>("/sentry.Sentry/SendMessageToRandomPeers", req).await?
            }
            SendRequest::All(req) => self.unary::<_, proto::SentPeers>("/sentry.Sentry/SendMessageToAll", req).await?,
        };
        sent.peers.iter().map(|bytes| decode_peer_id(bytes)).collect()
    }
}

enum SendRequest {
    ById(proto::SendMessageByIdRequest),
    ByMinBlock(proto::SendMessageByMinBlockRequest),
    Random(proto::SendMessageToRandomPeersRequest),
    All(proto::OutboundMessageData),
}

fn decode_peer_id(bytes: &[u8]) -> Result<PeerId, SentryError> {
    if bytes.len() != 64 {
        return Err(SentryError::malformed("peer id must be 64 bytes"));
    }
    Ok(PeerId::from_slice(bytes))
}

fn decode_inbound(message: proto::InboundMessage) -> Result<Option<InboundMessage>, SentryError> {
    let Ok(id) = proto::MessageId::try_from(message.id) else {
        tracing::debug!("Discarding inbound message with unknown id {}", message.id);
        return Ok(None);
    };
    Ok(Some(InboundMessage {
        id: EthMessageId::from(id),
        peer_id: decode_peer_id(&message.peer_id)?,
        data: message.data.into(),
    }))
}

#[async_trait::async_trait]
impl SentryClient for SentryGrpcClient {
    async fn set_status(&self, status: Status) -> Result<(), SentryError> {
        let request = proto::StatusData {
            network_id: status.network_id,
            total_difficulty: status.total_difficulty.to_be_bytes::<32>().to_vec(),
            best_hash: status.best_hash.to_vec(),
            genesis_hash: status.genesis_hash.to_vec(),
            fork_id: Some(fork_id_data(status.fork_id)),
            max_block: status.max_block,
        };
        self.unary::<_, proto::SetStatusReply>("/sentry.Sentry/SetStatus", request).await?;
        Ok(())
    }

    async fn hand_shake(&self) -> Result<u32, SentryError> {
        let reply: proto::HandShakeReply = self.unary("/sentry.Sentry/HandShake", proto::Empty {}).await?;
        Ok(reply.protocol)
    }

    async fn penalize_peer(&self, peer_id: PeerId, penalty: Penalty) -> Result<(), SentryError> {
        tracing::debug!("Penalizing peer {peer_id} ({penalty:?})");
        let request =
            proto::PenalizePeerRequest { peer_id: peer_id.to_vec(), penalty: proto::PenaltyKind::Kick as i32 };
        self.unary::<_, proto::Empty>("/sentry.Sentry/PenalizePeer", request).await?;
        Ok(())
    }

    async fn peer_min_block(&self, peer_id: PeerId, block_n: u64) -> Result<(), SentryError> {
        let request = proto::PeerMinBlockRequest { peer_id: peer_id.to_vec(), min_block: block_n };
        self.unary::<_, proto::Empty>("/sentry.Sentry/PeerMinBlock", request).await?;
        Ok(())
    }

    async fn send_message_by_id(&self, peer_id: PeerId, message: &EthMessage) -> Result<Vec<PeerId>, SentryError> {
        self.send_message(message, |data| {
            SendRequest::ById(proto::SendMessageByIdRequest { data: Some(data), peer_id: peer_id.to_vec() })
        })
        .await
    }

    async fn send_message_by_min_block(
        &self,
        min_block: u64,
        message: &EthMessage,
    ) -> Result<Vec<PeerId>, SentryError> {
        self.send_message(message, |data| {
            SendRequest::ByMinBlock(proto::SendMessageByMinBlockRequest { data: Some(data), min_block })
        })
        .await
    }

    async fn send_message_to_random_peers(
        &self,
        max_peers: u64,
        message: &EthMessage,
    ) -> Result<Vec<PeerId>, SentryError> {
        self.send_message(message, |data| {
            SendRequest::Random(proto::SendMessageToRandomPeersRequest { data: Some(data), max_peers })
        })
        .await
    }

    async fn send_message_to_all(&self, message: &EthMessage) -> Result<Vec<PeerId>, SentryError> {
        self.send_message(message, SendRequest::All).await
    }

    async fn messages(
        &self,
        ids: Vec<EthMessageId>,
    ) -> Result<BoxStream<'static, Result<InboundMessage, SentryError>>, SentryError> {
        let request = proto::MessagesRequest {
            ids: ids.into_iter().map(|id| proto::MessageId::from(id) as i32).collect(),
        };
        let mut grpc = self.inner.clone();
        grpc.ready().await.map_err(SentryError::Transport)?;
        let codec: ProstCodec<proto::MessagesRequest, proto::InboundMessage> = ProstCodec::default();
        let streaming = grpc
            .server_streaming(Request::new(request), PathAndQuery::from_static("/sentry.Sentry/Messages"), codec)
            .await?
            .into_inner();

        let stream = streaming
            .filter_map(|item| async move {
                match item {
                    Ok(message) => decode_inbound(message).transpose(),
                    Err(status) => Some(Err(status.into())),
                }
            })
            .boxed();
        Ok(stream)
    }

    async fn peer_count(&self) -> Result<u64, SentryError> {
        let reply: proto::PeerCountReply = self.unary("/sentry.Sentry/PeerCount", proto::Empty {}).await?;
        Ok(reply.count)
    }
}

fn fork_id_data(fork_id: ForkId) -> proto::ForkIdData {
    proto::ForkIdData { hash: fork_id.hash.0.to_vec(), next: fork_id.next }
}
