//! The frame reader, one long-lived task per connection.
//!
//! Decodes every inbound frame and routes it: responses to the pending
//! table, events and pushes to the subscription registry. One bad frame
//! never stops the loop. When the stream ends the reader rejects every
//! outstanding call and flips the client back to "not connected" so a
//! later call re-runs the lazy connect path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gantry_core::Frame;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::calls::PendingCalls;
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::TransportStream;

/// Shared state the reader routes into.
pub(crate) struct ReaderContext {
    pub pending: Arc<PendingCalls>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub connected: Arc<AtomicBool>,
}

/// Run the reader until the stream ends, then drain.
#[instrument(skip_all, name = "frame_reader")]
pub(crate) async fn run_reader(mut stream: Box<dyn TransportStream>, ctx: ReaderContext) {
    while let Some(next) = stream.next().await {
        let text = match next {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "transport receive failed, closing connection");
                break;
            }
        };
        match Frame::decode(&text) {
            Ok(frame) => route(frame, &ctx),
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }

    ctx.connected.store(false, Ordering::SeqCst);
    ctx.pending.fail_all();
    debug!("frame reader exited");
}

fn route(frame: Frame, ctx: &ReaderContext) {
    match frame {
        Frame::Response(res) => {
            let reply = if res.ok {
                Ok(res.payload.unwrap_or(Value::Null))
            } else {
                Err(res.error.unwrap_or(Value::Null))
            };
            if !ctx.pending.resolve(&res.id, reply) {
                debug!(id = %res.id, "response for unknown call ID, dropping");
            }
        }
        Frame::Event(_) | Frame::Push(_) => ctx.subscriptions.fan_out(&frame),
        Frame::Request(req) => {
            debug!(method = %req.method, "ignoring inbound request frame");
        }
        Frame::Unknown(value) => {
            debug!(frame = %value, "ignoring unknown frame");
        }
    }
}
