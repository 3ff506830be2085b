//! Stream subscription lifecycle.
//!
//! [`ConnectionManager`] keeps one subscription per [`SubscriptionTarget`]
//! alive. Each call to `connect` starts a new *generation*: a spawned session
//! task owning the transport, guarded by a [`CancellationToken`]. Status and
//! message events are only forwarded while their generation is current, so a
//! superseded session can never report into the new one.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use council_core::{ConnectionState, Message, SubscriptionTarget};

use crate::backoff::ReconnectPolicy;
use crate::transport::{Connector, TransportEvent, TransportSession};

/// Receives connection callbacks. Called with an internal lock held, so
/// implementations must not block or call back into the manager.
pub trait ConnectionObserver: Send + Sync {
    fn on_message(&self, message: Message);
    fn on_status_change(&self, state: ConnectionState);
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    Message(Message),
    Status(ConnectionState),
}

impl ConnectionObserver for mpsc::UnboundedSender<ConnectionEvent> {
    fn on_message(&self, message: Message) {
        let _ = self.send(ConnectionEvent::Message(message));
    }

    fn on_status_change(&self, state: ConnectionState) {
        let _ = self.send(ConnectionEvent::Status(state));
    }
}

/// Reconnect counter, generation and state change together under one lock.
struct Shared {
    generation: u64,
    state: ConnectionState,
    attempts: u32,
}

/// What a lost session should do next.
enum Reconnect {
    Superseded,
    Exhausted,
    After { attempt: u32, delay: Duration },
}

struct Inner {
    shared: Mutex<Shared>,
    observer: Arc<dyn ConnectionObserver>,
}

impl Inner {
    /// Start a new generation in `state`, orphaning every older session task.
    fn advance(&self, state: ConnectionState) -> u64 {
        let mut shared = self.shared.lock();
        shared.generation += 1;
        shared.attempts = 0;
        if shared.state != state {
            shared.state = state;
            self.observer.on_status_change(state);
        }
        shared.generation
    }

    /// Returns false when `generation` has been superseded.
    fn set_state(&self, generation: u64, state: ConnectionState) -> bool {
        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return false;
        }
        if shared.state != state {
            shared.state = state;
            self.observer.on_status_change(state);
        }
        true
    }

    /// Transport is up: clear the reconnect counter and report connected.
    fn mark_connected(&self, generation: u64) -> bool {
        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return false;
        }
        shared.attempts = 0;
        if shared.state != ConnectionState::Connected {
            shared.state = ConnectionState::Connected;
            self.observer.on_status_change(ConnectionState::Connected);
        }
        true
    }

    /// Count one more reconnect attempt for `generation`. The counter is
    /// left alone when the budget is spent or the generation is stale.
    fn next_reconnect(&self, generation: u64, policy: &ReconnectPolicy) -> Reconnect {
        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return Reconnect::Superseded;
        }
        let attempt = shared.attempts + 1;
        match policy.delay_for(attempt) {
            Some(delay) => {
                shared.attempts = attempt;
                Reconnect::After { attempt, delay }
            }
            None => Reconnect::Exhausted,
        }
    }

    fn deliver(&self, generation: u64, message: Message) -> bool {
        let shared = self.shared.lock();
        if shared.generation != generation {
            return false;
        }
        self.observer.on_message(message);
        true
    }
}

struct ActiveSession {
    target: SubscriptionTarget,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    inner: Arc<Inner>,
    active: Option<ActiveSession>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, observer: Arc<dyn ConnectionObserver>) -> Self {
        Self::with_policy(connector, observer, ReconnectPolicy::default())
    }

    pub fn with_policy(
        connector: Arc<dyn Connector>,
        observer: Arc<dyn ConnectionObserver>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            connector,
            policy,
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    generation: 0,
                    state: ConnectionState::Disconnected,
                    attempts: 0,
                }),
                observer,
            }),
            active: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.inner.shared.lock().attempts
    }

    pub fn target(&self) -> Option<&SubscriptionTarget> {
        self.active.as_ref().map(|a| &a.target)
    }

    /// Subscribe to `target`. A no-op while already connecting or connected
    /// to the same target; otherwise the current session is torn down first.
    pub fn connect(&mut self, target: SubscriptionTarget) {
        if let Some(active) = &self.active {
            if active.target == target
                && matches!(
                    self.state(),
                    ConnectionState::Connecting | ConnectionState::Connected
                )
            {
                debug!(subscription = %target, "already subscribed, ignoring connect");
                return;
            }
        }

        self.cancel_active();
        let generation = self.inner.advance(ConnectionState::Connecting);
        info!(subscription = %target, generation, "connecting");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_session(
            Arc::clone(&self.inner),
            Arc::clone(&self.connector),
            self.policy.clone(),
            target.clone(),
            generation,
            cancel.clone(),
        ));

        self.active = Some(ActiveSession {
            target,
            cancel,
            _task: task,
        });
    }

    /// Intentional teardown: cancels any pending reconnect, closes the
    /// transport and never reconnects on its own.
    pub fn disconnect(&mut self) {
        if let Some(active) = &self.active {
            info!(subscription = %active.target, "disconnecting");
        }
        self.cancel_active();
        self.inner.advance(ConnectionState::Disconnected);
    }

    fn cancel_active(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel_active();
    }
}

/// How a connected session ended.
enum SessionEnd {
    /// Cancelled or superseded; the task must exit quietly.
    Stop,
    /// Transport failure or unexpected close; schedule a reconnect.
    Lost,
}

async fn run_session(
    inner: Arc<Inner>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    target: SubscriptionTarget,
    generation: u64,
    cancel: CancellationToken,
) {
    let subscribe = json!({
        "action": "subscribe",
        "conversation_id": target.conversation_id,
    })
    .to_string();

    loop {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            opened = connector.connect(&target.stream_endpoint) => opened,
        };

        match opened {
            Ok(session) => {
                let end = drive_session(&inner, session, generation, &cancel, &subscribe).await;
                if let SessionEnd::Stop = end {
                    return;
                }
            }
            Err(e) => {
                warn!(
                    endpoint = %target.stream_endpoint,
                    error = %e,
                    kind = e.error_kind(),
                    "stream connect failed"
                );
            }
        }

        if !inner.set_state(generation, ConnectionState::Disconnected) {
            return;
        }

        let (attempt, delay) = match inner.next_reconnect(generation, &policy) {
            Reconnect::After { attempt, delay } => (attempt, delay),
            Reconnect::Superseded => return,
            Reconnect::Exhausted => {
                warn!(
                    max_attempts = policy.max_attempts,
                    conversation_id = %target.conversation_id,
                    "reconnect budget exhausted, staying disconnected"
                );
                return;
            }
        };
        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        if !inner.set_state(generation, ConnectionState::Connecting) {
            return;
        }
    }
}

async fn drive_session(
    inner: &Inner,
    mut session: Box<dyn TransportSession>,
    generation: u64,
    cancel: &CancellationToken,
    subscribe: &str,
) -> SessionEnd {
    if let Err(e) = session.send(subscribe.to_owned()).await {
        warn!(error = %e, "subscribe directive failed");
        session.close().await;
        return SessionEnd::Lost;
    }

    if !inner.mark_connected(generation) {
        session.close().await;
        return SessionEnd::Stop;
    }
    info!(generation, "stream subscribed");

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                session.close().await;
                return SessionEnd::Stop;
            }
            event = session.next_event() => event,
        };

        match event {
            TransportEvent::Text(raw) => match Message::from_payload(&raw) {
                Ok(message) => {
                    if !inner.deliver(generation, message) {
                        session.close().await;
                        return SessionEnd::Stop;
                    }
                }
                Err(e) => {
                    warn!(error = %e, len = raw.len(), "dropping unreadable stream payload");
                }
            },
            TransportEvent::Error(e) => {
                warn!(error = %e, "stream transport error");
                return SessionEnd::Lost;
            }
            TransportEvent::Closed => {
                warn!("stream closed by peer");
                return SessionEnd::Lost;
            }
        }
    }
}
