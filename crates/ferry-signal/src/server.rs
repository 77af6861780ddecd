//! WebSocket signaling server.
//!
//! Each accepted socket becomes one coordinator connection. Text frames carry
//! [`ClientRequest`]s in and [`ServerEvent`]s out; a per-socket writer task
//! drains the connection's outbox. Closing the socket leaves the room.

use crate::coordinator::Coordinator;
use crate::error::{Result, SignalError};
use crate::events::{ClientRequest, ServerEvent};
use crate::room::ConnectionId;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Signaling server bound to a TCP listener
pub struct SignalServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    coordinator: Arc<Coordinator>,
}

impl SignalServer {
    /// Bind the listener
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Io`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, coordinator: Arc<Coordinator>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            coordinator,
        })
    }

    /// Bound address; resolves port 0
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept sockets until `shutdown` flips or its sender is dropped
    ///
    /// # Errors
    ///
    /// Accept failures are logged and do not stop the server; this only
    /// returns `Ok`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Signaling server listening on ws://{}", self.local_addr);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let coordinator = Arc::clone(&self.coordinator);
                        tokio::spawn(async move {
                            if let Err(e) = handle_socket(coordinator, stream, peer).await {
                                debug!("Socket {} ended with error: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Signaling server stopped");
        Ok(())
    }
}

async fn handle_socket(
    coordinator: Arc<Coordinator>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| SignalError::Transport(format!("WebSocket accept error: {e}")))?;
    let (mut sink, mut source) = ws.split();

    let (outbox, mut events) = mpsc::unbounded_channel::<ServerEvent>();
    let connection_id = coordinator.connect(outbox)?;
    debug!("Socket {} is connection {}", peer, connection_id);

    // Ends once the coordinator drops the outbox on leave
    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode {}: {}", event.event_name(), e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch(&coordinator, connection_id, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Socket {} read error: {}", peer, e);
                break;
            }
        }
    }

    coordinator.leave(connection_id).await?;
    let _ = writer.await;
    debug!("Socket {} closed", peer);
    Ok(())
}

/// Handle one text frame; failures go back to the sender as `error` events
async fn dispatch(coordinator: &Coordinator, from: ConnectionId, text: &str) {
    let result = match ClientRequest::from_json(text) {
        Ok(request) => coordinator.handle_request(from, request).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        debug!("Request from {} failed: {}", from, e);
        coordinator.send_to(
            &from,
            ServerEvent::Error {
                message: e.to_string(),
            },
        );
    }
}
