//! Push transport seam.
//!
//! The connection manager only needs "open a session, send text, read events,
//! close". [`WsConnector`] provides that over `tokio-tungstenite`; tests plug in
//! channel-backed sessions.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use council_core::errors::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something that happened on an open session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text payload.
    Text(String),
    /// Mid-session failure. The session is unusable afterwards.
    Error(String),
    /// The peer closed the session.
    Closed,
}

/// One open transport session.
#[async_trait]
pub trait TransportSession: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next event. After `Error` or `Closed` the session is finished.
    async fn next_event(&mut self) -> TransportEvent;

    async fn close(&mut self);
}

/// Opens transport sessions to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn TransportSession>, TransportError>;
}

/// WebSocket connector.
#[derive(Clone, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn TransportSession>, TransportError> {
        let (ws, _) = connect_async(endpoint)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        Ok(Box::new(WsSession { ws }))
    }
}

struct WsSession {
    ws: WsStream,
}

#[async_trait]
impl TransportSession for WsSession {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.ws
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return TransportEvent::Text(text.as_str().to_owned()),
                Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return TransportEvent::Text(text),
                    Err(_) => {
                        tracing::debug!(len = bytes.len(), "dropping non-utf8 binary frame");
                    }
                },
                // Pings are answered by tungstenite on the next read/flush.
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None => return TransportEvent::Closed,
                Some(Err(e)) => return TransportEvent::Error(e.to_string()),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[tokio::test]
    async fn ws_session_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            ws.send(WsMessage::Text(format!("echo:{}", first.to_text().unwrap()).into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let mut session = WsConnector.connect(&format!("ws://{addr}")).await.unwrap();
        session.send("hello".into()).await.unwrap();
        assert_eq!(session.next_event().await, TransportEvent::Text("echo:hello".into()));
        assert_eq!(session.next_event().await, TransportEvent::Closed);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused_is_connect_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WsConnector.connect(&format!("ws://{addr}")).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }
}
