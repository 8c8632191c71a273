//! # gantry-client
//!
//! Client side of the gantry gateway connection: one persistent transport
//! multiplexes correlated request/response calls and a fanned-out
//! event/push stream.
//!
//! The pieces, leaves first:
//!
//! - [`transport`]: the seam over the physical connection, with a
//!   production WebSocket implementation.
//! - [`subscriptions`]: bounded fan-out queues for event/push frames.
//! - [`client`]: the [`GatewayClient`] itself. Lazy connect-once,
//!   handshake, correlated calls, teardown.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod errors;
pub mod subscriptions;
pub mod transport;

mod calls;
mod reader;

pub use client::GatewayClient;
pub use config::ClientConfig;
pub use errors::ClientError;
pub use subscriptions::{Subscription, SubscriptionId, SubscriptionRegistry};
pub use transport::{Connector, TransportError, TransportSink, TransportStream, WsConnector};
