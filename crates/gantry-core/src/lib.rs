//! # gantry-core
//!
//! Wire frame model, branded IDs, and logging setup shared by the gantry
//! gateway client and the event bridge.

#![deny(unsafe_code)]

pub mod frames;
pub mod ids;
pub mod logging;

pub use frames::{EventFrame, Frame, FrameError, PushFrame, RequestFrame, ResponseFrame};
pub use ids::{CallId, RunId};
