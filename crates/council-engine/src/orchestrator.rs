//! Requests to the conversation backend: continuation turns, world-event
//! broadcasts and direct messages to a single agent.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use council_core::settings::OrchestratorSettings;
use council_core::timestamp::now_rfc3339;
use council_core::{OrchestratorError, RequestId};

/// What triggered a continuation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Manual,
    Auto,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One "take the next turn" request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContinuationRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub agent_name: String,
    pub prompt: String,
}

impl ContinuationRequest {
    pub fn new(kind: RequestKind, agent_name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            kind,
            agent_name: agent_name.into(),
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn request_turn(&self, request: ContinuationRequest) -> Result<(), OrchestratorError>;

    /// Reachability check. Defaults to healthy for backends without one.
    async fn health(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }

    /// Announce a world event to every known agent.
    async fn broadcast_event(&self, _content: &str) -> Result<(), OrchestratorError> {
        Err(OrchestratorError::Unsupported("world events"))
    }

    /// Message one agent directly. Returns the agent's reply when the
    /// backend answers inline.
    async fn send_to_agent(
        &self,
        agent: &str,
        _message: &str,
    ) -> Result<Option<String>, OrchestratorError> {
        Err(OrchestratorError::UnknownAgent(agent.to_owned()))
    }
}

/// Event and direct-chat routes plus the caller identity sent with them.
#[derive(Clone, Debug, Default)]
struct Gateway {
    events: Option<Url>,
    agents: BTreeMap<String, Url>,
    user_id: String,
    session_id: String,
}

#[derive(Serialize)]
struct WorldEventBody<'a> {
    event_type: &'static str,
    content: &'a str,
    timestamp: String,
    broadcast_to: Vec<&'a str>,
}

#[derive(Serialize)]
struct DirectMessageBody<'a> {
    message: &'a str,
    user_id: &'a str,
    session_id: &'a str,
    timestamp: String,
}

#[derive(Deserialize)]
struct DirectReply {
    #[serde(default)]
    response: Option<String>,
}

/// HTTP orchestrator. Turns are form-encoded; events and direct messages
/// are JSON.
pub struct HttpOrchestrator {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
    gateway: Gateway,
}

fn parse_url(raw: &str) -> Result<Url, OrchestratorError> {
    Url::parse(raw).map_err(|e| OrchestratorError::InvalidEndpoint(format!("{raw}: {e}")))
}

impl HttpOrchestrator {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, OrchestratorError> {
        let endpoint = parse_url(endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("council-monitor/0.1")
            .build()
            .map_err(|e| OrchestratorError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            timeout,
            gateway: Gateway::default(),
        })
    }

    pub fn from_settings(settings: &OrchestratorSettings) -> Result<Self, OrchestratorError> {
        Self::new(&settings.url, Duration::from_millis(settings.timeout_ms))?.with_gateway(settings)
    }

    /// Route events and direct messages as configured. An empty
    /// `events_url` disables broadcasts.
    pub fn with_gateway(mut self, settings: &OrchestratorSettings) -> Result<Self, OrchestratorError> {
        let events = match settings.events_url.trim() {
            "" => None,
            url => Some(parse_url(url)?),
        };
        let agents = settings
            .agents
            .iter()
            .map(|(name, url)| parse_url(url).map(|url| (name.clone(), url)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        self.gateway = Gateway {
            events,
            agents,
            user_id: settings.user_id.clone(),
            session_id: settings.session_id.clone(),
        };
        Ok(self)
    }

    /// Agents reachable by direct message, in name order.
    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.gateway.agents.keys().map(String::as_str)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Same origin as the endpoint, path `/health`.
    fn health_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.set_path("/health");
        url.set_query(None);
        url
    }

    /// JSON POST carrying the caller identity headers.
    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &T,
    ) -> Result<reqwest::Response, OrchestratorError> {
        let resp = self
            .client
            .post(url.clone())
            .header("X-User-ID", &self.gateway.user_id)
            .header("X-Session-ID", &self.gateway.session_id)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OrchestratorError::from_status(status.as_u16(), body));
        }
        Ok(resp)
    }

    fn map_send_error(&self, e: reqwest::Error) -> OrchestratorError {
        if e.is_timeout() {
            OrchestratorError::Timeout(self.timeout)
        } else {
            OrchestratorError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    #[instrument(skip_all, fields(request_id = %request.id, kind = %request.kind))]
    async fn request_turn(&self, request: ContinuationRequest) -> Result<(), OrchestratorError> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .form(&[
                ("agent_name", request.agent_name.as_str()),
                ("prompt", request.prompt.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OrchestratorError::from_status(status.as_u16(), body));
        }
        debug!(status = status.as_u16(), "orchestrator accepted continuation");
        Ok(())
    }

    async fn health(&self) -> Result<(), OrchestratorError> {
        let resp = self
            .client
            .get(self.health_url())
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(OrchestratorError::from_status(status.as_u16(), body))
        }
    }

    #[instrument(skip_all)]
    async fn broadcast_event(&self, content: &str) -> Result<(), OrchestratorError> {
        let url = self
            .gateway
            .events
            .as_ref()
            .ok_or(OrchestratorError::Unsupported("world events"))?;
        let body = WorldEventBody {
            event_type: "world_event",
            content,
            timestamp: now_rfc3339(),
            broadcast_to: self.agents().collect(),
        };
        self.post_json(url, &body).await?;
        debug!(recipients = body.broadcast_to.len(), "world event delivered");
        Ok(())
    }

    #[instrument(skip_all, fields(agent = %agent))]
    async fn send_to_agent(
        &self,
        agent: &str,
        message: &str,
    ) -> Result<Option<String>, OrchestratorError> {
        let url = self
            .gateway
            .agents
            .get(agent)
            .ok_or_else(|| OrchestratorError::UnknownAgent(agent.to_owned()))?;
        let body = DirectMessageBody {
            message,
            user_id: &self.gateway.user_id,
            session_id: &self.gateway.session_id,
            timestamp: now_rfc3339(),
        };
        let resp = self.post_json(url, &body).await?;
        // Replies are optional; an empty or non-JSON body is not an error.
        let reply = resp.json::<DirectReply>().await.ok().and_then(|r| r.response);
        debug!(replied = reply.is_some(), "direct message delivered");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(prompt: &str) -> ContinuationRequest {
        ContinuationRequest::new(RequestKind::Manual, "Monitor", prompt)
    }

    #[tokio::test]
    async fn posts_form_encoded_turn_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orchestrate"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("agent_name=Monitor"))
            .and(body_string_contains("prompt=next+please%21"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            HttpOrchestrator::new(&format!("{}/orchestrate", server.uri()), Duration::from_secs(5)).unwrap();
        client.request_turn(request("next please!")).await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let client = HttpOrchestrator::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.request_turn(request("go")).await.unwrap_err();
        match &err {
            OrchestratorError::Status { status, body } => {
                assert_eq!(*status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn slow_orchestrator_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = HttpOrchestrator::new(&server.uri(), Duration::from_millis(50)).unwrap();
        let err = client.request_turn(request("go")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn health_checks_origin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            HttpOrchestrator::new(&format!("{}/api/orchestrate?x=1", server.uri()), Duration::from_secs(5))
                .unwrap();
        client.health().await.unwrap();
    }

    fn gateway_settings(server: &MockServer) -> OrchestratorSettings {
        OrchestratorSettings {
            url: format!("{}/orchestrate", server.uri()),
            events_url: format!("{}/api/events/world", server.uri()),
            agents: BTreeMap::from([
                ("PresidentAgent".to_string(), format!("{}/api/chat/president", server.uri())),
                ("TreasuryAgent".to_string(), format!("{}/api/chat/treasury", server.uri())),
            ]),
            user_id: "operator".into(),
            session_id: "s-42".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn world_event_is_broadcast_to_every_agent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/events/world"))
            .and(header("content-type", "application/json"))
            .and(header("x-user-id", "operator"))
            .and(header("x-session-id", "s-42"))
            .and(body_partial_json(json!({
                "event_type": "world_event",
                "content": "The granary burned.",
                "broadcast_to": ["PresidentAgent", "TreasuryAgent"],
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpOrchestrator::from_settings(&gateway_settings(&server)).unwrap();
        client.broadcast_event("The granary burned.").await.unwrap();
    }

    #[tokio::test]
    async fn direct_message_returns_inline_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/treasury"))
            .and(header("x-user-id", "operator"))
            .and(body_partial_json(json!({
                "message": "How full are the vaults?",
                "user_id": "operator",
                "session_id": "s-42",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Half full."})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat/president"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = HttpOrchestrator::from_settings(&gateway_settings(&server)).unwrap();
        let reply = client
            .send_to_agent("TreasuryAgent", "How full are the vaults?")
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some("Half full."));

        let silent = client.send_to_agent("PresidentAgent", "Noted?").await.unwrap();
        assert_eq!(silent, None);
    }

    #[tokio::test]
    async fn unknown_agent_and_missing_event_route_fail_fast() {
        let server = MockServer::start().await;
        let mut settings = gateway_settings(&server);
        settings.events_url = String::new();
        let client = HttpOrchestrator::from_settings(&settings).unwrap();

        let err = client.send_to_agent("Oracle", "hello").await.unwrap_err();
        assert_eq!(err.error_kind(), "unknown_agent");
        let err = client.broadcast_event("storm").await.unwrap_err();
        assert_eq!(err.error_kind(), "unsupported");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_direct_message_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such agent"))
            .mount(&server)
            .await;

        let client = HttpOrchestrator::from_settings(&gateway_settings(&server)).unwrap();
        let err = client.send_to_agent("PresidentAgent", "hi").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Status { status: 404, .. }));
    }

    #[test]
    fn bad_agent_url_is_rejected() {
        let settings = OrchestratorSettings {
            agents: BTreeMap::from([("PresidentAgent".to_string(), "::nope".to_string())]),
            ..Default::default()
        };
        let err = HttpOrchestrator::from_settings(&settings).err().unwrap();
        assert_eq!(err.error_kind(), "invalid_endpoint");
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let err = HttpOrchestrator::new("not a url", Duration::from_secs(1)).err().unwrap();
        assert_eq!(err.error_kind(), "invalid_endpoint");
    }
}
