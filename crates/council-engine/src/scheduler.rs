//! Debounced continuation scheduling.
//!
//! The scheduler is owned by a single event loop. Timers and request tasks
//! never touch its state directly: they report back through
//! [`SchedulerEvent`]s, which the owner feeds to [`ContinuationScheduler::handle_event`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use council_core::{Message, Mode, OrchestratorError, RequestId, SchedulerError};

use crate::orchestrator::{ContinuationRequest, Orchestrator, RequestKind};
use crate::prompt::PromptBuilder;

/// Quiet period after the last tail change before an auto continuation fires.
pub const DEBOUNCE: Duration = Duration::from_millis(3000);

#[derive(Debug)]
pub enum SchedulerEvent {
    TimerFired {
        generation: u64,
    },
    RequestFinished {
        id: RequestId,
        kind: RequestKind,
        result: Result<(), OrchestratorError>,
    },
}

/// Something the owner may want to surface.
#[derive(Clone, Debug)]
pub enum SchedulerOutcome {
    Dispatched {
        id: RequestId,
        kind: RequestKind,
    },
    Finished {
        id: RequestId,
        kind: RequestKind,
        result: Result<(), OrchestratorError>,
    },
}

struct PendingTimer {
    generation: u64,
    trigger: Message,
    handle: JoinHandle<()>,
}

/// Clears `in_flight` and reports completion however the request task exits.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    id: RequestId,
    kind: RequestKind,
    result: Option<Result<(), OrchestratorError>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        let result = self
            .result
            .take()
            .unwrap_or_else(|| Err(OrchestratorError::Network("request task aborted".into())));
        let _ = self.events.send(SchedulerEvent::RequestFinished {
            id: self.id.clone(),
            kind: self.kind,
            result,
        });
    }
}

pub struct ContinuationScheduler {
    mode: Mode,
    orchestrator: Arc<dyn Orchestrator>,
    prompts: PromptBuilder,
    agent_name: String,
    debounce: Duration,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    timer: Option<PendingTimer>,
    timer_generation: u64,
    in_flight: Arc<AtomicBool>,
    draft: String,
}

impl ContinuationScheduler {
    /// Returns the scheduler and the event stream its owner must drain.
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        prompts: PromptBuilder,
        agent_name: impl Into<String>,
        mode: Mode,
    ) -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            mode,
            orchestrator,
            prompts,
            agent_name: agent_name.into(),
            debounce: DEBOUNCE,
            events,
            timer: None,
            timer_generation: 0,
            in_flight: Arc::new(AtomicBool::new(false)),
            draft: String::new(),
        };
        (scheduler, rx)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_some()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// The message the armed timer will answer, if any.
    pub fn pending_trigger(&self) -> Option<&Message> {
        self.timer.as_ref().map(|t| &t.trigger)
    }

    /// React to a new tail message. Returns true when a timer was armed.
    pub fn on_tail(&mut self, message: &Message) -> bool {
        if self.mode == Mode::Halt {
            debug!(id = %message.id, "halted, not scheduling continuation");
            return false;
        }
        self.cancel_pending();
        self.arm(message.clone());
        true
    }

    fn arm(&mut self, trigger: Message) {
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let events = self.events.clone();
        let delay = self.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SchedulerEvent::TimerFired { generation });
        });
        debug!(generation, id = %trigger.id, delay_ms = delay.as_millis() as u64, "continuation armed");
        self.timer = Some(PendingTimer {
            generation,
            trigger,
            handle,
        });
    }

    /// Disarm the pending timer. Returns true if one was armed.
    pub fn cancel_pending(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.handle.abort();
                debug!(generation = timer.generation, "pending continuation cancelled");
                true
            }
            None => false,
        }
    }

    pub fn handle_event(&mut self, event: SchedulerEvent) -> Option<SchedulerOutcome> {
        match event {
            SchedulerEvent::TimerFired { generation } => self.on_timer(generation),
            SchedulerEvent::RequestFinished { id, kind, result } => {
                match &result {
                    Ok(()) => info!(request_id = %id, kind = %kind, "continuation delivered"),
                    Err(e) => warn!(
                        request_id = %id,
                        kind = %kind,
                        error = %e,
                        error_kind = e.error_kind(),
                        retryable = e.is_retryable(),
                        "continuation failed"
                    ),
                }
                Some(SchedulerOutcome::Finished { id, kind, result })
            }
        }
    }

    fn on_timer(&mut self, generation: u64) -> Option<SchedulerOutcome> {
        if self.timer.as_ref().map(|t| t.generation) != Some(generation) {
            debug!(generation, "stale timer ignored");
            return None;
        }
        let timer = self.timer.take()?;

        if self.mode == Mode::Halt {
            debug!("halted before timer fired, dropping continuation");
            return None;
        }
        if !self.draft.trim().is_empty() {
            debug!("operator draft staged, skipping auto continuation");
            return None;
        }
        if self.is_in_flight() {
            debug!("request already in flight, skipping auto continuation");
            return None;
        }

        let prompt = self.prompts.auto(&timer.trigger);
        let id = self.dispatch(RequestKind::Auto, prompt);
        Some(SchedulerOutcome::Dispatched {
            id,
            kind: RequestKind::Auto,
        })
    }

    /// Send operator text now. Refused while another request is in flight.
    pub fn send_manual(&mut self, text: &str) -> Result<RequestId, SchedulerError> {
        if self.is_in_flight() {
            return Err(SchedulerError::RequestInFlight);
        }
        if text.trim().is_empty() {
            return Err(SchedulerError::EmptyPrompt);
        }
        self.cancel_pending();
        let prompt = self.prompts.manual(text);
        self.draft.clear();
        Ok(self.dispatch(RequestKind::Manual, prompt))
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Switch mode. Always disarms the pending timer; resuming from `Halt`
    /// re-evaluates `last` immediately. Returns true when a timer was armed.
    pub fn set_mode(&mut self, next: Mode, last: Option<&Message>) -> bool {
        let previous = self.mode;
        self.mode = next;
        self.cancel_pending();
        if previous != next {
            info!(from = %previous, to = %next, "mode changed");
        }

        match (previous, next, last) {
            (Mode::Halt, Mode::Auto, Some(last)) => self.on_tail(last),
            _ => false,
        }
    }

    fn dispatch(&mut self, kind: RequestKind, prompt: String) -> RequestId {
        let request = ContinuationRequest::new(kind, self.agent_name.clone(), prompt);
        let id = request.id.clone();
        self.in_flight.store(true, Ordering::SeqCst);
        info!(request_id = %id, kind = %kind, "dispatching continuation");

        let mut guard = InFlightGuard {
            flag: Arc::clone(&self.in_flight),
            events: self.events.clone(),
            id: id.clone(),
            kind,
            result: None,
        };
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            guard.result = Some(orchestrator.request_turn(request).await);
        });
        id
    }
}

impl Drop for ContinuationScheduler {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
