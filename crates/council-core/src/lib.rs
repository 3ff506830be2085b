pub mod errors;
pub mod ids;
pub mod messages;
pub mod settings;
pub mod state;
pub mod timestamp;

pub use errors::{OrchestratorError, PayloadError, SchedulerError, SettingsError, TransportError};
pub use ids::{ConversationId, MessageId, RequestId};
pub use messages::Message;
pub use settings::MonitorSettings;
pub use state::{ConnectionState, Mode, SubscriptionTarget};
