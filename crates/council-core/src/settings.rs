//! Monitor configuration.
//!
//! A user's `settings.json` only needs the keys it changes: it is overlaid on
//! the compiled defaults section by section, and `COUNCIL_*` variables win
//! over both. Command-line flags are layered on top by the binary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::SettingsError;
use crate::ids::ConversationId;
use crate::state::{Mode, SubscriptionTarget};

pub type Result<T> = std::result::Result<T, SettingsError>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub stream: StreamSettings,
    pub orchestrator: OrchestratorSettings,
    pub conversation: ConversationSettings,
    pub scheduler: SchedulerSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub endpoint: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub url: String,
    /// Sentinel sent as `agent_name` so the backend knows who is asking.
    pub agent_name: String,
    pub timeout_ms: u64,
    /// World-event endpoint; events are addressed to every agent in `agents`.
    pub events_url: String,
    /// Direct chat endpoint per agent name.
    pub agents: BTreeMap<String, String>,
    /// Sent as `X-User-ID` on events and direct messages.
    pub user_id: String,
    /// Sent as `X-Session-ID` on events and direct messages.
    pub session_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationSettings {
    /// Fixed conversation id. Unset means "today's conversation".
    pub id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub initial_mode: Mode,
    /// Appended verbatim to every continuation prompt.
    pub directives: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-target levels, e.g. `{"council_stream": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8080/stream".into(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/orchestrate".into(),
            agent_name: "Monitor".into(),
            timeout_ms: 30_000,
            events_url: "http://localhost:8080/api/events/world".into(),
            agents: BTreeMap::from([
                (
                    "PresidentAgent".to_string(),
                    "http://localhost:8080/api/chat/president".to_string(),
                ),
                (
                    "TreasuryAgent".to_string(),
                    "http://localhost:8080/api/chat/treasury".to_string(),
                ),
            ]),
            user_id: "system".into(),
            session_id: "monitor-session".into(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            initial_mode: Mode::Auto,
            directives: vec![
                "Persist your reply to the conversation store before finishing.".into(),
                "Do not create files, documents, or any other side artifacts.".into(),
            ],
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}

impl MonitorSettings {
    /// The configured conversation, or the one the backend is writing today.
    pub fn conversation_id(&self) -> ConversationId {
        match self.conversation.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => ConversationId::from_raw(id),
            _ => ConversationId::today(),
        }
    }

    pub fn target(&self) -> SubscriptionTarget {
        SubscriptionTarget::new(self.stream.endpoint.clone(), self.conversation_id())
    }
}

/// `~/.council/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    home.join(".council").join("settings.json")
}

pub fn load_settings() -> Result<MonitorSettings> {
    load_settings_from_path(&settings_path())
}

/// Defaults, overlaid with the file at `path` (if there is one), then the
/// environment. A file that is present but unreadable or not JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<MonitorSettings> {
    let mut merged = serde_json::to_value(MonitorSettings::default())?;

    match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(path = %path.display(), "applying settings file");
            overlay(&mut merged, serde_json::from_str(&content)?);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file");
        }
        Err(e) => return Err(e.into()),
    }

    let mut settings: MonitorSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

/// Write `patch` into `base` in place. Nested objects are walked key by key;
/// any other value replaces what was there. `null` drops the key: a settings
/// field falls back to its default and a map entry (an agent) disappears.
pub fn overlay(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                if value.is_null() {
                    base_map.remove(&key);
                    continue;
                }
                match base_map.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

/// Apply environment overrides. Invalid values are ignored and the file or
/// default value stays in place.
pub fn apply_env_overrides<F>(settings: &mut MonitorSettings, read: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read_string = |key: &str| read(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = read_string("COUNCIL_STREAM_URL") {
        settings.stream.endpoint = v;
    }
    if let Some(v) = read_string("COUNCIL_ORCHESTRATOR_URL") {
        settings.orchestrator.url = v;
    }
    if let Some(v) = read_string("COUNCIL_EVENTS_URL") {
        settings.orchestrator.events_url = v;
    }
    if let Some(v) = read_string("COUNCIL_AGENT_NAME") {
        settings.orchestrator.agent_name = v;
    }
    if let Some(v) = read_string("COUNCIL_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        if (1_000..=600_000).contains(&v) {
            settings.orchestrator.timeout_ms = v;
        }
    }
    if let Some(v) = read_string("COUNCIL_CONVERSATION_ID") {
        settings.conversation.id = Some(v);
    }
    if let Some(mode) = read_string("COUNCIL_MODE").and_then(|v| v.parse::<Mode>().ok()) {
        settings.scheduler.initial_mode = mode;
    }
    if let Some(v) = read_string("COUNCIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_string("COUNCIL_LOG_JSON").and_then(|v| parse_bool(&v)) {
        settings.logging.json = v;
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
