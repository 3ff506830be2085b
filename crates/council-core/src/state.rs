use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SettingsError;
use crate::ids::ConversationId;

/// Where to subscribe: a stream endpoint plus the conversation to follow.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionTarget {
    pub stream_endpoint: String,
    pub conversation_id: ConversationId,
}

impl SubscriptionTarget {
    pub fn new(stream_endpoint: impl Into<String>, conversation_id: ConversationId) -> Self {
        Self {
            stream_endpoint: stream_endpoint.into(),
            conversation_id,
        }
    }
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.stream_endpoint, self.conversation_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    /// Numeric form for gauges.
    pub fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the scheduler advances the conversation on its own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Auto,
    Halt,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Halt => "halt",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "halt" => Ok(Self::Halt),
            other => Err(SettingsError::InvalidValue(format!(
                "mode must be auto or halt, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("AUTO".parse::<Mode>().unwrap(), Mode::Auto);
        assert_eq!(" halt ".parse::<Mode>().unwrap(), Mode::Halt);
        assert!("pause".parse::<Mode>().is_err());
    }

    #[test]
    fn mode_serde_is_snake_case() {
        assert_eq!(serde_json::to_string(&Mode::Halt).unwrap(), "\"halt\"");
        let back: Mode = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(back, Mode::Auto);
    }

    #[test]
    fn targets_compare_by_both_fields() {
        let a = SubscriptionTarget::new("wss://stream", ConversationId::from_raw("c1"));
        let b = SubscriptionTarget::new("wss://stream", ConversationId::from_raw("c2"));
        assert_ne!(a, b);
        assert_eq!(a, SubscriptionTarget::new("wss://stream", ConversationId::from_raw("c1")));
        assert_eq!(b.to_string(), "wss://stream#c2");
    }
}
