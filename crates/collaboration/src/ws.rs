/// WebSocket client transport speaking the JSON `SyncMessage` protocol
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info};

use crate::{
    CollaborationError, CollaboratorUser, DocumentId, ErrorCode, Link, Result, SyncMessage,
    Transport, DEFAULT_HEARTBEAT,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsTransport {
    url: String,
    heartbeat: Duration,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    /// Interval at which a connected link pings the server so it is not evicted as idle.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval.max(Duration::from_millis(1));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn open(&self) -> Result<WsStream> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| CollaborationError::ConnectionFailed(format!("{}: {}", self.url, e)))?;
        Ok(stream)
    }
}

async fn send(stream: &mut WsStream, msg: &SyncMessage) -> Result<()> {
    stream
        .send(Message::Text(msg.to_json()?))
        .await
        .map_err(|e| CollaborationError::ConnectionFailed(e.to_string()))
}

/// Next protocol message, skipping control frames
async fn recv(stream: &mut WsStream) -> Result<SyncMessage> {
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| CollaborationError::ConnectionFailed(e.to_string()))?;
        match frame {
            Message::Text(text) => return SyncMessage::from_json(&text),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(CollaborationError::ConnectionFailed(
        "connection closed during handshake".to_string(),
    ))
}

fn handshake_error(document_id: &DocumentId, code: ErrorCode, message: String) -> CollaborationError {
    match code {
        ErrorCode::NotFound => CollaborationError::DocumentNotFound(document_id.clone()),
        _ => CollaborationError::ConnectionFailed(message),
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn publish(&self, document_id: &DocumentId, title: &str, content: &str) -> Result<()> {
        let mut stream = self.open().await?;
        send(
            &mut stream,
            &SyncMessage::Publish {
                document_id: document_id.clone(),
                title: title.to_string(),
                content: content.to_string(),
            },
        )
        .await?;

        let result = loop {
            match recv(&mut stream).await? {
                SyncMessage::Published { document_id: id } if &id == document_id => break Ok(()),
                SyncMessage::Error { code, message } => {
                    break Err(handshake_error(document_id, code, message))
                }
                other => debug!("Ignoring {:?} while publishing", other),
            }
        };
        let _ = stream.close(None).await;
        result
    }

    async fn connect(&self, document_id: &DocumentId, user: &CollaboratorUser) -> Result<Link> {
        let mut stream = self.open().await?;
        send(
            &mut stream,
            &SyncMessage::Connect {
                document_id: document_id.clone(),
                user: user.clone(),
            },
        )
        .await?;

        let snapshot = loop {
            match recv(&mut stream).await? {
                SyncMessage::Connected { snapshot } => break snapshot,
                SyncMessage::Error { code, message } => {
                    return Err(handshake_error(document_id, code, message))
                }
                other => debug!("Ignoring {:?} before connected", other),
            }
        };
        info!("Connected to {} at {}", document_id, self.url);

        let (mut ws_tx, mut ws_rx) = stream.split();
        let (outgoing, mut out_rx) = mpsc::unbounded_channel::<SyncMessage>();
        let (in_tx, incoming) = mpsc::unbounded_channel::<SyncMessage>();

        // Forward local messages to the socket and ping while quiet; closing the channel closes the socket
        let mut heartbeat = tokio::time::interval(self.heartbeat);
        tokio::spawn(async move {
            heartbeat.tick().await;
            loop {
                let msg = tokio::select! {
                    msg = out_rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                    _ = heartbeat.tick() => SyncMessage::Ping,
                };
                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    debug!("Socket write failed: {}", e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        // Forward socket messages to the channel until either side goes away
        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => match SyncMessage::from_json(&text) {
                        Ok(msg) => {
                            if in_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => error!("Bad message from server: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Socket read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Link {
            snapshot,
            outgoing,
            incoming,
        })
    }
}
