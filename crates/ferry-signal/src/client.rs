//! WebSocket signaling client.

use crate::error::{Result, SignalError};
use crate::events::{ClientRequest, ServerEvent};
use crate::room::ConnectionId;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type ClientWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A participant's connection to a signaling server
pub struct SignalClient {
    stream: ClientWsStream,
    connection_id: ConnectionId,
}

impl SignalClient {
    /// Connect and wait for the server to assign a connection id
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Transport`] if the handshake fails or the first
    /// event is not `connected`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (mut stream, _) = connect_async(url)
            .await
            .map_err(|e| SignalError::Transport(format!("WebSocket connect: {e}")))?;

        match next_event(&mut stream).await? {
            ServerEvent::Connected { connection_id } => {
                tracing::debug!("Connected to {} as {}", url, connection_id);
                Ok(Self {
                    stream,
                    connection_id,
                })
            }
            other => Err(SignalError::Transport(format!(
                "expected connected, got {}",
                other.event_name()
            ))),
        }
    }

    /// Id assigned by the server
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Send one request
    pub async fn send(&mut self, request: &ClientRequest) -> Result<()> {
        let text = request.to_json()?;
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| SignalError::Transport(format!("WebSocket send error: {e}")))
    }

    /// Wait for the next event
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Transport`] once the server closes the socket.
    pub async fn next_event(&mut self) -> Result<ServerEvent> {
        next_event(&mut self.stream).await
    }

    /// Close the socket; the server treats this as leaving
    pub async fn close(mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| SignalError::Transport(format!("WebSocket close error: {e}")))
    }
}

async fn next_event(stream: &mut ClientWsStream) -> Result<ServerEvent> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return ServerEvent::from_json(&text),
            Some(Ok(Message::Close(_))) | None => {
                return Err(SignalError::Transport("connection closed".into()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(SignalError::Transport(format!("WebSocket recv error: {e}")));
            }
        }
    }
}
