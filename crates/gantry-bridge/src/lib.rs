//! # gantry-bridge
//!
//! Consumes one subscription from the gateway client and translates the
//! gateway's heterogeneous event/push taxonomy into a small normalized
//! [`Action`] vocabulary, delivered in arrival order, with run-completion
//! ("idle") signaling.

#![deny(unsafe_code)]

pub mod actions;
pub mod bridge;

pub use actions::{Action, AgentStatus, NoticeLevel};
pub use bridge::{Bridge, BridgeConfig};
