//! Client side of the sentry daemon.
//!
//! The sentry owns peer connections and wire framing; this crate owns everything the sync
//! engine needs to talk to it: the RPC surface as a trait, a gRPC implementation of that trait,
//! the typed eth/66 messages that ride in the opaque payloads, and the status/handshake
//! connection lifecycle.

mod api;
mod error;
mod grpc;

pub mod eth;
pub mod proto;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use api::{set_status_and_handshake, InboundMessage, Penalty, PeerId, SentryClient, Status, ETH_PROTOCOL_VERSION};
pub use error::SentryError;
pub use grpc::SentryGrpcClient;
