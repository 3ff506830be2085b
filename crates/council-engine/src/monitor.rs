//! The monitor loop: one task owning the connection, the ledger and the
//! scheduler, driven by connection events, scheduler events and user actions.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use council_core::{
    ConnectionState, ConversationId, Mode, MonitorSettings, OrchestratorError, RequestId,
    SchedulerError, SubscriptionTarget,
};
use council_stream::{
    ConnectionEvent, ConnectionManager, Connector, Ingested, LedgerEntry, MessageLedger,
    ReconnectPolicy,
};
use council_telemetry::MetricsRecorder;

use crate::orchestrator::{Orchestrator, RequestKind};
use crate::prompt::PromptBuilder;
use crate::scheduler::{ContinuationScheduler, SchedulerEvent, SchedulerOutcome};

/// Operator input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserAction {
    SendManual(String),
    SetDraft(String),
    SetMode(Mode),
    Clear,
    Retarget(Retarget),
    /// World event for every agent. Never enters the transcript directly.
    BroadcastEvent(String),
    /// Bypasses the scheduler, so allowed while a continuation is in flight.
    SendToAgent { agent: String, message: String },
    CheckHealth,
    Shutdown,
}

/// Where to follow next. Unset fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Retarget {
    pub stream_endpoint: Option<String>,
    pub conversation_id: Option<ConversationId>,
}

impl Retarget {
    pub fn conversation(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            ..Self::default()
        }
    }

    pub fn endpoint(stream_endpoint: impl Into<String>) -> Self {
        Self {
            stream_endpoint: Some(stream_endpoint.into()),
            ..Self::default()
        }
    }

    fn resolve(self, current: &SubscriptionTarget) -> SubscriptionTarget {
        SubscriptionTarget::new(
            self.stream_endpoint
                .unwrap_or_else(|| current.stream_endpoint.clone()),
            self.conversation_id
                .unwrap_or_else(|| current.conversation_id.clone()),
        )
    }
}

/// Display-facing notifications from the monitor loop.
#[derive(Clone, Debug)]
pub enum MonitorUpdate {
    Accepted { position: usize, entry: LedgerEntry },
    Status(ConnectionState),
    Pending(bool),
    ModeChanged(Mode),
    Dispatched { id: RequestId, kind: RequestKind },
    Finished {
        id: RequestId,
        kind: RequestKind,
        result: Result<(), OrchestratorError>,
    },
    Rejected(SchedulerError),
    Cleared,
    Retargeted(SubscriptionTarget),
    Health(Result<(), OrchestratorError>),
    EventBroadcast(Result<(), OrchestratorError>),
    AgentReply {
        agent: String,
        result: Result<Option<String>, OrchestratorError>,
    },
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub target: SubscriptionTarget,
    pub agent_name: String,
    pub directives: Vec<String>,
    pub initial_mode: Mode,
    pub reconnect: ReconnectPolicy,
}

impl MonitorConfig {
    pub fn from_settings(settings: &MonitorSettings) -> Self {
        Self {
            target: settings.target(),
            agent_name: settings.orchestrator.agent_name.clone(),
            directives: settings.scheduler.directives.clone(),
            initial_mode: settings.scheduler.initial_mode,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

pub struct Monitor {
    connection: ConnectionManager,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ledger: MessageLedger,
    scheduler: ContinuationScheduler,
    scheduler_events: mpsc::UnboundedReceiver<SchedulerEvent>,
    orchestrator: Arc<dyn Orchestrator>,
    target: SubscriptionTarget,
    metrics: Arc<MetricsRecorder>,
    updates: mpsc::UnboundedSender<MonitorUpdate>,
    last_pending: bool,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        connector: Arc<dyn Connector>,
        orchestrator: Arc<dyn Orchestrator>,
        metrics: Arc<MetricsRecorder>,
    ) -> (Self, mpsc::UnboundedReceiver<MonitorUpdate>) {
        let (conn_tx, connection_events) = mpsc::unbounded_channel();
        let connection = ConnectionManager::with_policy(connector, Arc::new(conn_tx), config.reconnect);
        let (scheduler, scheduler_events) = ContinuationScheduler::new(
            Arc::clone(&orchestrator),
            PromptBuilder::new(config.directives),
            config.agent_name,
            config.initial_mode,
        );
        let (updates, updates_rx) = mpsc::unbounded_channel();

        let monitor = Self {
            connection,
            connection_events,
            ledger: MessageLedger::new(),
            scheduler,
            scheduler_events,
            orchestrator,
            target: config.target,
            metrics,
            updates,
            last_pending: false,
        };
        (monitor, updates_rx)
    }

    /// Subscribe and process events until `Shutdown` or the action channel closes.
    pub async fn run(mut self, mut actions: mpsc::Receiver<UserAction>) {
        info!(subscription = %self.target, mode = %self.scheduler.mode(), "monitor starting");
        self.connection.connect(self.target.clone());

        loop {
            tokio::select! {
                Some(event) = self.connection_events.recv() => self.on_connection_event(event),
                Some(event) = self.scheduler_events.recv() => self.on_scheduler_event(event),
                action = actions.recv() => match action {
                    Some(UserAction::Shutdown) | None => break,
                    Some(action) => self.on_action(action),
                },
            }
            self.publish_pending();
        }

        self.scheduler.cancel_pending();
        self.disconnect_and_drain();
        self.publish_pending();
        info!("monitor stopped");
    }

    /// Once disconnect returns the old session can no longer enqueue, so any
    /// buffered message belongs to it and is dropped. Status changes still
    /// reach the display.
    fn disconnect_and_drain(&mut self) {
        self.connection.disconnect();
        while let Ok(event) = self.connection_events.try_recv() {
            if let ConnectionEvent::Status(state) = event {
                self.on_status(state);
            }
        }
    }

    fn emit(&self, update: MonitorUpdate) {
        let _ = self.updates.send(update);
    }

    fn publish_pending(&mut self) {
        let pending = self.scheduler.is_pending();
        if pending != self.last_pending {
            self.last_pending = pending;
            self.emit(MonitorUpdate::Pending(pending));
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message(message) => match self.ledger.ingest(message) {
                Ingested::Accepted { position, notice } => {
                    self.metrics.counter_inc("ledger.accepted", &[], 1);
                    if let Some(entry) = self.ledger.snapshot().get(position) {
                        self.emit(MonitorUpdate::Accepted {
                            position,
                            entry: entry.clone(),
                        });
                    }
                    self.scheduler.on_tail(&notice);
                }
                Ingested::Duplicate => {
                    self.metrics.counter_inc("ledger.duplicates", &[], 1);
                }
            },
            ConnectionEvent::Status(state) => self.on_status(state),
        }
    }

    fn on_status(&mut self, state: ConnectionState) {
        self.metrics.gauge_set("stream.status", &[], state.as_gauge());
        self.emit(MonitorUpdate::Status(state));
    }

    fn on_scheduler_event(&mut self, event: SchedulerEvent) {
        let Some(outcome) = self.scheduler.handle_event(event) else {
            return;
        };
        match outcome {
            SchedulerOutcome::Dispatched { id, kind } => {
                self.metrics
                    .counter_inc("continuation.sent", &[("kind", kind.as_str())], 1);
                self.emit(MonitorUpdate::Dispatched { id, kind });
            }
            SchedulerOutcome::Finished { id, kind, result } => {
                if result.is_err() {
                    self.metrics
                        .counter_inc("continuation.failed", &[("kind", kind.as_str())], 1);
                }
                self.emit(MonitorUpdate::Finished { id, kind, result });
            }
        }
    }

    fn on_action(&mut self, action: UserAction) {
        match action {
            UserAction::SendManual(text) => match self.scheduler.send_manual(&text) {
                Ok(id) => {
                    self.metrics
                        .counter_inc("continuation.sent", &[("kind", RequestKind::Manual.as_str())], 1);
                    self.emit(MonitorUpdate::Dispatched {
                        id,
                        kind: RequestKind::Manual,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "manual continuation rejected");
                    self.metrics.counter_inc("continuation.rejected", &[], 1);
                    self.emit(MonitorUpdate::Rejected(e));
                }
            },
            UserAction::SetDraft(text) => self.scheduler.set_draft(text),
            UserAction::SetMode(mode) => {
                self.scheduler.set_mode(mode, self.ledger.last());
                self.emit(MonitorUpdate::ModeChanged(mode));
            }
            UserAction::Clear => {
                self.ledger.clear();
                self.emit(MonitorUpdate::Cleared);
            }
            UserAction::Retarget(retarget) => self.retarget(retarget),
            UserAction::BroadcastEvent(content) => self.broadcast_event(content),
            UserAction::SendToAgent { agent, message } => self.send_to_agent(agent, message),
            UserAction::CheckHealth => {
                let orchestrator = Arc::clone(&self.orchestrator);
                let updates = self.updates.clone();
                tokio::spawn(async move {
                    let result = orchestrator.health().await;
                    if let Err(e) = &result {
                        warn!(error = %e, "orchestrator health check failed");
                    }
                    let _ = updates.send(MonitorUpdate::Health(result));
                });
            }
            UserAction::Shutdown => {}
        }
    }

    fn reject_blank(&self, text: &str) -> bool {
        if !text.trim().is_empty() {
            return false;
        }
        self.metrics.counter_inc("continuation.rejected", &[], 1);
        self.emit(MonitorUpdate::Rejected(SchedulerError::EmptyPrompt));
        true
    }

    fn broadcast_event(&self, content: String) {
        if self.reject_blank(&content) {
            return;
        }
        let orchestrator = Arc::clone(&self.orchestrator);
        let metrics = Arc::clone(&self.metrics);
        let updates = self.updates.clone();
        tokio::spawn(async move {
            let result = orchestrator.broadcast_event(&content).await;
            match &result {
                Ok(()) => metrics.counter_inc("world_event.sent", &[], 1),
                Err(e) => warn!(error = %e, kind = e.error_kind(), "world event failed"),
            }
            let _ = updates.send(MonitorUpdate::EventBroadcast(result));
        });
    }

    fn send_to_agent(&self, agent: String, message: String) {
        if self.reject_blank(&message) {
            return;
        }
        let orchestrator = Arc::clone(&self.orchestrator);
        let metrics = Arc::clone(&self.metrics);
        let updates = self.updates.clone();
        tokio::spawn(async move {
            let result = orchestrator.send_to_agent(&agent, &message).await;
            match &result {
                Ok(_) => metrics.counter_inc("direct_message.sent", &[("agent", agent.as_str())], 1),
                Err(e) => warn!(agent = %agent, error = %e, "direct message failed"),
            }
            let _ = updates.send(MonitorUpdate::AgentReply { agent, result });
        });
    }

    fn retarget(&mut self, retarget: Retarget) {
        let target = retarget.resolve(&self.target);
        info!(from = %self.target, to = %target, "retargeting");

        self.disconnect_and_drain();
        self.scheduler.cancel_pending();
        self.ledger.clear();
        self.connection.connect(target.clone());
        self.target = target.clone();
        self.emit(MonitorUpdate::Retargeted(target));
    }
}
