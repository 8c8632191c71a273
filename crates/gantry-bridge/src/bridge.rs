//! The protocol translator.
//!
//! One consumer task reads frames from a single subscription in arrival
//! order and drives a per-run state machine: Idle → Active on
//! `run.started`, Active → Idle on any terminal event or push. Streaming
//! text deltas accumulate without changing run state. A dispatch failure
//! for one frame is logged and never stops the consumer.

use std::sync::Arc;
use std::time::Duration;

use gantry_client::{GatewayClient, Subscription, SubscriptionId, SubscriptionRegistry};
use gantry_core::{EventFrame, Frame, PushFrame, RunId};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::actions::{Action, AgentStatus, NoticeLevel};

/// Bridge configuration.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Agent label used when the gateway does not name one.
    pub default_agent: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_agent: "agent".to_owned(),
        }
    }
}

/// Per-run state owned by the bridge.
#[derive(Default)]
struct RunState {
    active_run: Option<RunId>,
    agent: Option<String>,
    fragments: Vec<String>,
}

/// Translates gateway frames into [`Action`]s. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

struct Inner {
    subscriptions: Arc<SubscriptionRegistry>,
    actions: mpsc::Sender<Action>,
    config: BridgeConfig,
    state: Mutex<RunState>,
    /// True whenever no run is active. Starts true.
    idle: watch::Sender<bool>,
    consumer: Mutex<Option<(SubscriptionId, JoinHandle<()>)>>,
}

impl Bridge {
    /// Create a bridge over a subscription registry.
    #[must_use]
    pub fn new(
        subscriptions: Arc<SubscriptionRegistry>,
        actions: mpsc::Sender<Action>,
        config: BridgeConfig,
    ) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                subscriptions,
                actions,
                config,
                state: Mutex::new(RunState::default()),
                idle,
                consumer: Mutex::new(None),
            }),
        }
    }

    /// Create a bridge wired to a client's subscription registry.
    #[must_use]
    pub fn for_client(
        client: &GatewayClient,
        actions: mpsc::Sender<Action>,
        config: BridgeConfig,
    ) -> Self {
        Self::new(client.subscriptions(), actions, config)
    }

    /// Subscribe and launch the consumer task. Idempotent.
    pub fn start(&self) {
        let mut consumer = self.inner.consumer.lock();
        if consumer.is_some() {
            return;
        }
        let subscription = self.inner.subscriptions.subscribe();
        let id = subscription.id();
        let handle = tokio::spawn(consume(self.inner.clone(), subscription));
        *consumer = Some((id, handle));
        debug!(subscription = %id, "bridge started");
    }

    /// Cancel the consumer, unsubscribe, and release any idle waiter.
    /// Idempotent.
    pub fn stop(&self) {
        let taken = self.inner.consumer.lock().take();
        if let Some((id, handle)) = taken {
            handle.abort();
            self.inner.subscriptions.unsubscribe(id);
            debug!(subscription = %id, "bridge stopped");
        }
        let _ = self.inner.idle.send_replace(true);
    }

    /// Wait until the current run reaches a terminal outcome, up to
    /// `timeout`.
    ///
    /// Returns the text accumulated so far. Never fails: on timeout a
    /// warning [`Action::Notice`] is emitted and the partial text is
    /// returned.
    pub async fn wait_for_idle(&self, timeout: Duration) -> String {
        let mut idle = self.inner.idle.subscribe();
        let timed_out =
            tokio::time::timeout(timeout, idle.wait_for(|idle| *idle)).await.is_err();
        if timed_out {
            warn!(?timeout, "timed out waiting for run to finish");
            let notice = Action::Notice {
                level: NoticeLevel::Warning,
                message: format!("Timed out waiting for the gateway run after {timeout:?}"),
            };
            if let Err(e) = self.inner.actions.send(notice).await {
                debug!(error = %e, "failed to emit timeout notice");
            }
        }
        self.collected_text()
    }

    /// Whether no run is currently active.
    pub fn is_idle(&self) -> bool {
        *self.inner.idle.borrow()
    }

    /// The active run's ID, if a run is in progress.
    pub fn active_run(&self) -> Option<RunId> {
        self.inner.state.lock().active_run.clone()
    }

    /// All accumulated text fragments joined in arrival order.
    pub fn collected_text(&self) -> String {
        self.inner.state.lock().fragments.concat()
    }
}

#[instrument(skip_all, name = "bridge_consumer")]
async fn consume(inner: Arc<Inner>, mut subscription: Subscription) {
    while let Some(frame) = subscription.recv().await {
        if let Err(e) = inner.dispatch(frame).await {
            warn!(error = %e, "failed to deliver action, continuing");
        }
    }
    debug!("bridge consumer exited");
}

impl Inner {
    async fn dispatch(&self, frame: Frame) -> Result<(), SendError<Action>> {
        match frame {
            Frame::Event(event) => self.dispatch_event(event).await,
            Frame::Push(push) => self.dispatch_push(push).await,
            other => {
                debug!(kind = other.kind(), "bridge ignoring frame");
                Ok(())
            }
        }
    }

    async fn dispatch_event(&self, event: EventFrame) -> Result<(), SendError<Action>> {
        let payload = &event.payload;
        match event.event.as_str() {
            "run.started" => {
                let run_id = string_field(payload, "runId").map(RunId::from_string);
                let agent = string_field(payload, "agent")
                    .unwrap_or_else(|| self.config.default_agent.clone());
                let message = string_field(payload, "message").unwrap_or_default();
                self.begin_run(run_id, agent.clone());
                self.emit(Action::ActivateAgent { agent, message }).await
            }
            "run.completed" => {
                let text = string_field(payload, "text");
                let message = string_field(payload, "message")
                    .unwrap_or_else(|| "Run completed".to_owned());
                self.finish_run(text, AgentStatus::Completed, message).await
            }
            "run.error" => {
                let message = string_field(payload, "error")
                    .or_else(|| string_field(payload, "message"))
                    .unwrap_or_else(|| "Run failed".to_owned());
                self.finish_run(None, AgentStatus::Error, message).await
            }
            "permission.requested" => {
                let question = string_field(payload, "question")
                    .unwrap_or_else(|| "The gateway requested approval".to_owned());
                self.emit(Action::Ask { question }).await
            }
            "health.changed" => {
                let healthy = payload
                    .get("healthy")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let level = if healthy {
                    NoticeLevel::Info
                } else {
                    NoticeLevel::Warning
                };
                let message = string_field(payload, "message").unwrap_or_else(|| {
                    format!(
                        "Gateway health changed: {}",
                        if healthy { "healthy" } else { "degraded" }
                    )
                });
                self.emit(Action::Notice { level, message }).await
            }
            other => {
                debug!(event = other, "ignoring unrecognized event");
                Ok(())
            }
        }
    }

    async fn dispatch_push(&self, push: PushFrame) -> Result<(), SendError<Action>> {
        let payload = &push.payload;
        match push.push_type() {
            Some("text_delta") => {
                if let Some(text) = string_field(payload, "text") {
                    self.state.lock().fragments.push(text);
                }
                Ok(())
            }
            Some("text_final") => {
                let text = string_field(payload, "text");
                self.finish_run(text, AgentStatus::Completed, "Run completed".to_owned())
                    .await
            }
            Some("text_error") => {
                let message = string_field(payload, "message")
                    .unwrap_or_else(|| "Run failed".to_owned());
                self.finish_run(None, AgentStatus::Error, message).await
            }
            Some("text_aborted") => {
                self.finish_run(None, AgentStatus::Error, "Run aborted".to_owned())
                    .await
            }
            Some("send_confirmed") => {
                let message = string_field(payload, "message")
                    .unwrap_or_else(|| "Message delivered".to_owned());
                self.emit(Action::Notice {
                    level: NoticeLevel::Info,
                    message,
                })
                .await
            }
            Some("send_failed") => {
                let message = string_field(payload, "message")
                    .unwrap_or_else(|| "Message delivery failed".to_owned());
                self.emit(Action::Notice {
                    level: NoticeLevel::Error,
                    message,
                })
                .await
            }
            Some("terminal") => match string_field(payload, "content") {
                Some(content) => self.emit(Action::Terminal { content }).await,
                None => {
                    debug!("terminal push without content, ignoring");
                    Ok(())
                }
            },
            other => {
                debug!(push_type = other, "ignoring unrecognized push");
                Ok(())
            }
        }
    }

    /// Enter the Active state: capture the run, reset accumulated text,
    /// clear the idle signal.
    fn begin_run(&self, run_id: Option<RunId>, agent: String) {
        {
            let mut state = self.state.lock();
            state.active_run = run_id;
            state.agent = Some(agent);
            state.fragments.clear();
        }
        let _ = self.idle.send_replace(false);
    }

    /// Return to Idle: append any final fragment, emit the deactivation,
    /// set the idle signal. The signal is set even when the action cannot
    /// be delivered, so no waiter is left hanging.
    async fn finish_run(
        &self,
        final_text: Option<String>,
        status: AgentStatus,
        message: String,
    ) -> Result<(), SendError<Action>> {
        let agent = {
            let mut state = self.state.lock();
            if let Some(text) = final_text {
                state.fragments.push(text);
            }
            state.active_run = None;
            state
                .agent
                .take()
                .unwrap_or_else(|| self.config.default_agent.clone())
        };
        let result = self
            .emit(Action::DeactivateAgent {
                agent,
                status,
                message,
            })
            .await;
        let _ = self.idle.send_replace(true);
        result
    }

    async fn emit(&self, action: Action) -> Result<(), SendError<Action>> {
        self.actions.send(action).await
    }
}

fn string_field(payload: &Value, name: &str) -> Option<String> {
    payload.get(name).and_then(Value::as_str).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn event(name: &str, payload: Value) -> Frame {
        Frame::decode(&json!({"type": "event", "event": name, "payload": payload}).to_string())
            .unwrap()
    }

    fn push(payload: Value) -> Frame {
        Frame::decode(&json!({"type": "push", "payload": payload}).to_string()).unwrap()
    }

    fn harness() -> (Bridge, Arc<SubscriptionRegistry>, mpsc::Receiver<Action>) {
        let registry = Arc::new(SubscriptionRegistry::new(32));
        let (tx, rx) = mpsc::channel(32);
        let bridge = Bridge::new(registry.clone(), tx, BridgeConfig::default());
        bridge.start();
        (bridge, registry, rx)
    }

    // ── Run lifecycle ───────────────────────────────────────────────

    #[tokio::test]
    async fn run_lifecycle_accumulates_text_and_signals_idle() {
        let (bridge, registry, mut actions) = harness();

        registry.fan_out(&event("run.started", json!({"runId": "r1", "agent": "coder"})));
        assert_matches!(actions.recv().await, Some(Action::ActivateAgent { agent, .. }) => {
            assert_eq!(agent, "coder");
        });
        assert!(!bridge.is_idle());
        assert_eq!(bridge.active_run(), Some(RunId::from("r1")));

        let waiter = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.wait_for_idle(Duration::from_secs(30)).await }
        });

        registry.fan_out(&push(json!({"type": "text_delta", "text": "Hello"})));
        registry.fan_out(&push(json!({"type": "text_delta", "text": " world"})));
        registry.fan_out(&event("run.completed", json!({"runId": "r1"})));

        assert_matches!(
            actions.recv().await,
            Some(Action::DeactivateAgent { status: AgentStatus::Completed, agent, .. }) => {
                assert_eq!(agent, "coder");
            }
        );
        assert_eq!(waiter.await.unwrap(), "Hello world");
        assert_eq!(bridge.collected_text(), "Hello world");
        assert!(bridge.is_idle());
        assert_eq!(bridge.active_run(), None);
    }

    #[tokio::test]
    async fn wait_for_idle_after_terminal_event_returns_immediately() {
        let (bridge, registry, mut actions) = harness();
        registry.fan_out(&event("run.started", json!({"runId": "r1"})));
        registry.fan_out(&push(json!({"type": "text_delta", "text": "done"})));
        registry.fan_out(&event("run.completed", json!({})));
        let _ = actions.recv().await;
        let _ = actions.recv().await;

        // Already idle; even a tiny deadline is enough.
        let text = bridge.wait_for_idle(Duration::from_millis(1)).await;
        assert_eq!(text, "done");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_idle_timeout_degrades_to_partial_text() {
        let (bridge, registry, mut actions) = harness();
        registry.fan_out(&event("run.started", json!({"runId": "r1"})));
        registry.fan_out(&push(json!({"type": "text_delta", "text": "partial"})));
        assert_matches!(actions.recv().await, Some(Action::ActivateAgent { .. }));

        // No terminal event ever arrives.
        let text = bridge.wait_for_idle(Duration::from_millis(10)).await;
        assert_eq!(text, "partial");
        assert_matches!(
            actions.recv().await,
            Some(Action::Notice { level: NoticeLevel::Warning, .. })
        );
        assert!(!bridge.is_idle());
    }

    #[tokio::test]
    async fn text_final_is_terminal_and_appends_fragment() {
        let (bridge, registry, mut actions) = harness();
        registry.fan_out(&event("run.started", json!({"runId": "r1"})));
        registry.fan_out(&push(json!({"type": "text_delta", "text": "a"})));
        registry.fan_out(&push(json!({"type": "text_final", "text": "b"})));

        assert_matches!(actions.recv().await, Some(Action::ActivateAgent { .. }));
        assert_matches!(
            actions.recv().await,
            Some(Action::DeactivateAgent { status: AgentStatus::Completed, .. })
        );
        assert_eq!(bridge.collected_text(), "ab");
        assert!(bridge.is_idle());
    }

    #[tokio::test]
    async fn run_error_deactivates_with_error_status() {
        let (bridge, registry, mut actions) = harness();
        registry.fan_out(&event("run.started", json!({"runId": "r1"})));
        registry.fan_out(&event("run.error", json!({"error": "model overloaded"})));

        assert_matches!(actions.recv().await, Some(Action::ActivateAgent { .. }));
        assert_matches!(
            actions.recv().await,
            Some(Action::DeactivateAgent { status: AgentStatus::Error, message, .. }) => {
                assert_eq!(message, "model overloaded");
            }
        );
        assert!(bridge.is_idle());
    }

    #[tokio::test]
    async fn text_aborted_maps_to_error_status() {
        let (bridge, registry, mut actions) = harness();
        registry.fan_out(&event("run.started", json!({"runId": "r1"})));
        registry.fan_out(&push(json!({"type": "text_aborted"})));

        assert_matches!(actions.recv().await, Some(Action::ActivateAgent { .. }));
        assert_matches!(
            actions.recv().await,
            Some(Action::DeactivateAgent { status: AgentStatus::Error, message, .. }) => {
                assert_eq!(message, "Run aborted");
            }
        );
        assert!(bridge.is_idle());
    }

    #[tokio::test]
    async fn new_run_resets_accumulated_text() {
        let (bridge, registry, mut actions) = harness();
        registry.fan_out(&event("run.started", json!({"runId": "r1"})));
        registry.fan_out(&push(json!({"type": "text_delta", "text": "first"})));
        registry.fan_out(&event("run.completed", json!({})));
        let _ = actions.recv().await;
        let _ = actions.recv().await;
        assert_eq!(bridge.collected_text(), "first");

        registry.fan_out(&event("run.started", json!({"runId": "r2"})));
        assert_matches!(actions.recv().await, Some(Action::ActivateAgent { .. }));
        assert_eq!(bridge.collected_text(), "");
        registry.fan_out(&push(json!({"type": "text_delta", "text": "second"})));
        registry.fan_out(&event("run.completed", json!({})));
        let _ = actions.recv().await;
        assert_eq!(bridge.collected_text(), "second");
    }

    // ── Non-run translations ────────────────────────────────────────

    #[tokio::test]
    async fn permission_request_becomes_ask() {
        let (_bridge, registry, mut actions) = harness();
        registry.fan_out(&event(
            "permission.requested",
            json!({"question": "Allow shell access?"}),
        ));
        assert_matches!(actions.recv().await, Some(Action::Ask { question }) => {
            assert_eq!(question, "Allow shell access?");
        });
    }

    #[tokio::test]
    async fn send_confirmations_become_notices() {
        let (_bridge, registry, mut actions) = harness();
        registry.fan_out(&push(json!({"type": "send_confirmed"})));
        registry.fan_out(&push(json!({"type": "send_failed", "message": "peer offline"})));

        assert_matches!(
            actions.recv().await,
            Some(Action::Notice { level: NoticeLevel::Info, .. })
        );
        assert_matches!(
            actions.recv().await,
            Some(Action::Notice { level: NoticeLevel::Error, message }) => {
                assert_eq!(message, "peer offline");
            }
        );
    }

    #[tokio::test]
    async fn health_changes_become_notices() {
        let (_bridge, registry, mut actions) = harness();
        registry.fan_out(&event("health.changed", json!({"healthy": true})));
        registry.fan_out(&event("health.changed", json!({"healthy": false})));

        assert_matches!(
            actions.recv().await,
            Some(Action::Notice { level: NoticeLevel::Info, .. })
        );
        assert_matches!(
            actions.recv().await,
            Some(Action::Notice { level: NoticeLevel::Warning, .. })
        );
    }

    #[tokio::test]
    async fn terminal_push_becomes_terminal_action() {
        let (_bridge, registry, mut actions) = harness();
        registry.fan_out(&push(json!({"type": "terminal", "content": "$ ls\nsrc"})));
        assert_matches!(actions.recv().await, Some(Action::Terminal { content }) => {
            assert_eq!(content, "$ ls\nsrc");
        });
    }

    // ── Forward compatibility and isolation ─────────────────────────

    #[tokio::test]
    async fn unrecognized_events_and_pushes_are_ignored() {
        let (_bridge, registry, mut actions) = harness();
        registry.fan_out(&event("run.rescheduled", json!({})));
        registry.fan_out(&push(json!({"type": "metrics", "cpu": 0.9})));
        registry.fan_out(&push(json!({"no_type": true})));
        registry.fan_out(&event("permission.requested", json!({"question": "q"})));

        // Only the recognized frame produced an action.
        assert_matches!(actions.recv().await, Some(Action::Ask { .. }));
        assert!(actions.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_failure_does_not_stop_the_consumer() {
        let (bridge, registry, actions) = harness();
        // Caller went away; every emit now fails.
        drop(actions);

        registry.fan_out(&event("run.started", json!({"runId": "r1"})));
        registry.fan_out(&push(json!({"type": "text_delta", "text": "hi"})));
        registry.fan_out(&event("run.completed", json!({})));

        // The state machine still ran to completion.
        tokio::time::timeout(Duration::from_secs(5), async {
            while !(bridge.is_idle() && bridge.collected_text() == "hi") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("bridge should reach idle despite emit failures");
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[tokio::test]
    async fn start_is_idempotent() {
        let (bridge, registry, _actions) = harness();
        bridge.start();
        bridge.start();
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn stop_unsubscribes_and_releases_waiters() {
        let (bridge, registry, mut actions) = harness();
        registry.fan_out(&event("run.started", json!({"runId": "r1"})));
        assert_matches!(actions.recv().await, Some(Action::ActivateAgent { .. }));
        assert!(!bridge.is_idle());

        let waiter = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.wait_for_idle(Duration::from_secs(30)).await }
        });
        // Give the waiter a chance to park before stopping.
        tokio::task::yield_now().await;

        bridge.stop();
        let _ = waiter.await.unwrap();
        assert!(bridge.is_idle());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn stop_twice_is_a_noop() {
        let (bridge, registry, _actions) = harness();
        bridge.stop();
        bridge.stop();
        assert_eq!(registry.count(), 0);
        assert!(bridge.is_idle());
    }

    #[tokio::test]
    async fn default_agent_label_is_used_when_unnamed() {
        let (_bridge, registry, mut actions) = harness();
        registry.fan_out(&event("run.started", json!({"runId": "r1"})));
        assert_matches!(actions.recv().await, Some(Action::ActivateAgent { agent, .. }) => {
            assert_eq!(agent, "agent");
        });
    }
}
