//! The gateway client.
//!
//! One client owns one lazily-established connection. The first caller to
//! need the gateway opens the transport, starts the frame reader, and
//! performs the handshake; concurrent first-time callers observe a single
//! connect attempt. Calls are correlated by a per-connection monotonic ID
//! and resolved by the reader; `close()` is the master teardown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gantry_core::{CallId, RequestFrame};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::calls::PendingCalls;
use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::reader::{run_reader, ReaderContext};
use crate::subscriptions::{Subscription, SubscriptionId, SubscriptionRegistry};
use crate::transport::{Connector, TransportSink, WsConnector};

/// Fixed handshake method, called once per connection before any other
/// call is considered safe.
const HANDSHAKE_METHOD: &str = "system.hello";

/// Handle to one gateway connection. Cheap to clone.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    connector: Box<dyn Connector>,
    /// Serializes first-time connects.
    connect_lock: tokio::sync::Mutex<()>,
    /// True once the transport is open and the handshake completed. The
    /// reader flips this back on stream end.
    connected: Arc<AtomicBool>,
    /// Set by `close()`; a closed client never reconnects.
    closed: AtomicBool,
    sink: tokio::sync::Mutex<Option<Box<dyn TransportSink>>>,
    pending: Arc<PendingCalls>,
    subscriptions: Arc<SubscriptionRegistry>,
    next_call: AtomicU64,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl GatewayClient {
    /// Create a client that connects over WebSocket per the config.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let connector = WsConnector::new(config.endpoint.clone(), config.token.clone());
        Self::with_connector(config, Box::new(connector))
    }

    /// Create a client over a custom [`Connector`].
    #[must_use]
    pub fn with_connector(config: ClientConfig, connector: Box<dyn Connector>) -> Self {
        let subscriptions = Arc::new(SubscriptionRegistry::new(config.queue_capacity));
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                connect_lock: tokio::sync::Mutex::new(()),
                connected: Arc::new(AtomicBool::new(false)),
                closed: AtomicBool::new(false),
                sink: tokio::sync::Mutex::new(None),
                pending: Arc::new(PendingCalls::new()),
                subscriptions,
                next_call: AtomicU64::new(0),
                reader: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Whether the connection is currently up (handshake complete).
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Establish the connection if it is not already up.
    ///
    /// Idempotent. On any failure (transport open or handshake) the
    /// client is left "not connected" so a later attempt can retry.
    pub async fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }
        if self.inner.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _guard = self.inner.connect_lock.lock().await;
        if self.inner.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }

        let (sink, stream) = self.inner.connector.connect().await?;
        *self.inner.sink.lock().await = Some(sink);

        // Replace any reader left over from a lost connection.
        if let Some(stale) = self.inner.reader.lock().take() {
            stale.abort();
        }
        let ctx = ReaderContext {
            pending: self.inner.pending.clone(),
            subscriptions: self.inner.subscriptions.clone(),
            connected: self.inner.connected.clone(),
        };
        let handle = tokio::spawn(run_reader(stream, ctx));
        *self.inner.reader.lock() = Some(handle);

        // The reader is live, so the handshake response is correlated
        // like any other call.
        let handshake = self
            .call_on_connection(
                HANDSHAKE_METHOD,
                json!({}),
                self.inner.config.handshake_timeout,
            )
            .await;
        match handshake {
            Ok(payload) => {
                debug!(payload = %payload, "gateway handshake complete");
                self.inner.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "gateway handshake failed, tearing down");
                self.teardown().await;
                Err(ClientError::Handshake(Box::new(e)))
            }
        }
    }

    /// Call a gateway method with the configured default timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.call_with_timeout(method, params, self.inner.config.call_timeout)
            .await
    }

    /// Call a gateway method with an explicit timeout.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        self.ensure_connected().await?;
        self.call_on_connection(method, params, timeout).await
    }

    /// Register a new subscription for event/push frames.
    pub fn subscribe(&self) -> Subscription {
        self.inner.subscriptions.subscribe()
    }

    /// Remove a subscription; a no-op for unknown handles.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.subscriptions.unsubscribe(id);
    }

    /// Shared handle to the subscription registry.
    pub fn subscriptions(&self) -> Arc<SubscriptionRegistry> {
        self.inner.subscriptions.clone()
    }

    /// Master teardown: cancel the reader, close the transport, reject
    /// remaining calls, clear subscriptions. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.teardown().await;
        self.inner.subscriptions.clear();
        info!("gateway client closed");
    }

    /// Correlated call on the already-open connection.
    async fn call_on_connection(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let seq = self.inner.next_call.fetch_add(1, Ordering::SeqCst) + 1;
        let id = CallId::from_sequence(seq);
        let rx = self.inner.pending.register(id.as_str());

        let frame = RequestFrame::new(id.as_str(), method, params);
        let wire = match frame.encode() {
            Ok(wire) => wire,
            Err(e) => {
                let _ = self.inner.pending.remove(id.as_str());
                return Err(ClientError::Encode(e));
            }
        };
        debug!(method, id = %id, "sending request");
        if let Err(e) = self.send_text(wire).await {
            let _ = self.inner.pending.remove(id.as_str());
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(payload))) => Ok(payload),
            Ok(Ok(Err(error))) => Err(ClientError::Rpc {
                method: method.to_owned(),
                error,
            }),
            Ok(Err(_closed)) => Err(ClientError::ConnectionClosed),
            Err(_elapsed) => {
                let _ = self.inner.pending.remove(id.as_str());
                Err(ClientError::Timeout {
                    method: method.to_owned(),
                    timeout,
                })
            }
        }
    }

    async fn send_text(&self, wire: String) -> Result<(), ClientError> {
        let mut sink = self.inner.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => match sink.send(wire).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    // The socket is gone; let the next call reconnect lazily.
                    self.inner.connected.store(false, Ordering::SeqCst);
                    Err(e.into())
                }
            },
            None => Err(ClientError::ConnectionClosed),
        }
    }

    async fn teardown(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.reader.lock().take() {
            handle.abort();
        }
        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "error closing transport");
            }
        }
        self.inner.pending.fail_all();
    }
}
