//! Continuation engine: prompt building, the orchestrator client, the
//! debounced scheduler and the monitor loop that wires them to the stream.

pub mod monitor;
pub mod orchestrator;
pub mod prompt;
pub mod scheduler;

pub use monitor::{Monitor, MonitorConfig, MonitorUpdate, Retarget, UserAction};
pub use orchestrator::{ContinuationRequest, HttpOrchestrator, Orchestrator, RequestKind};
pub use prompt::PromptBuilder;
pub use scheduler::{ContinuationScheduler, SchedulerEvent, SchedulerOutcome, DEBOUNCE};
