//! Shared-document WebSocket server
//! Hosts published notes and relays edits, presence and chat between collaborators

use collaboration::{CollaborationError, DocumentId, ErrorCode, Hub, SyncMessage, UserId};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

type Tx = mpsc::UnboundedSender<Message>;

/// The document and user a connection has joined as
struct Membership {
    document_id: DocumentId,
    user_id: UserId,
    token: u64,
}

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener, hub: Hub) -> anyhow::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        info!("New connection from: {}", addr);
        tokio::spawn(handle_connection(stream, addr, hub.clone()));
    }
}

/// Periodically drop collaborators that stopped talking.
pub async fn evict_idle_loop(hub: Hub, max_idle: std::time::Duration) {
    let Ok(max_idle_chrono) = chrono::Duration::from_std(max_idle) else {
        warn!("Idle timeout {:?} out of range, eviction disabled", max_idle);
        return;
    };
    let mut interval = tokio::time::interval(max_idle / 2);
    loop {
        interval.tick().await;
        let evicted = hub.evict_idle(max_idle_chrono).await;
        if evicted > 0 {
            info!("Evicted {} idle collaborators", evicted);
        }
    }
}

pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, hub: Hub) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                debug!("Failed to send message: {}", e);
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut membership: Option<Membership> = None;

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                debug!("Error receiving message from {}: {}", addr, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let outcome = match SyncMessage::from_json(&text) {
                    Ok(msg) => handle_sync_message(msg, &hub, &tx, &mut membership).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = outcome {
                    warn!("Error handling message from {}: {}", addr, e);
                    send(&tx, &error_reply(&e));
                }
            }
            Message::Ping(data) => {
                touch(&hub, &membership).await;
                let _ = tx.send(Message::Pong(data));
            }
            Message::Pong(_) => touch(&hub, &membership).await,
            Message::Close(_) => {
                debug!("Client {} requested close", addr);
                break;
            }
            _ => {}
        }
    }

    if let Some(m) = membership {
        hub.leave(&m.document_id, &m.user_id, Some(m.token)).await;
    }
    drop(tx);
    let _ = send_task.await;
    info!("Connection closed: {}", addr);
}

async fn handle_sync_message(
    msg: SyncMessage,
    hub: &Hub,
    tx: &Tx,
    membership: &mut Option<Membership>,
) -> collaboration::Result<()> {
    match msg {
        SyncMessage::Publish {
            document_id,
            title,
            content,
        } => {
            hub.host(document_id.clone(), title, content).await;
            send(tx, &SyncMessage::Published { document_id });
        }

        SyncMessage::Connect { document_id, user } => {
            if let Some(previous) = membership.take() {
                hub.leave(&previous.document_id, &previous.user_id, Some(previous.token))
                    .await;
            }

            let user_id = user.id.clone();
            let joined = hub.join(&document_id, user).await?;
            send(
                tx,
                &SyncMessage::Connected {
                    snapshot: joined.snapshot,
                },
            );

            // Relay hub broadcasts to this socket
            let forward_tx = tx.clone();
            let mut incoming = joined.incoming;
            tokio::spawn(async move {
                while let Some(msg) = incoming.recv().await {
                    if !send(&forward_tx, &msg) {
                        break;
                    }
                }
            });

            *membership = Some(Membership {
                document_id,
                user_id,
                token: joined.token,
            });
        }

        other => {
            let m = membership.as_ref().ok_or(CollaborationError::NotConnected)?;
            let leaving = matches!(other, SyncMessage::Leave { .. });
            hub.handle(&m.document_id, &m.user_id, m.token, other).await?;
            if leaving {
                *membership = None;
            }
        }
    }

    Ok(())
}

/// Socket-level keepalives count as activity for idle eviction.
async fn touch(hub: &Hub, membership: &Option<Membership>) {
    if let Some(m) = membership {
        hub.touch(&m.document_id, &m.user_id, m.token).await;
    }
}

fn error_reply(e: &CollaborationError) -> SyncMessage {
    let code = match e {
        CollaborationError::DocumentNotFound(_) => ErrorCode::NotFound,
        CollaborationError::NotConnected
        | CollaborationError::Protocol(_)
        | CollaborationError::SerializationError(_) => ErrorCode::BadRequest,
        _ => ErrorCode::Internal,
    };
    SyncMessage::Error {
        code,
        message: e.to_string(),
    }
}

/// Queue `msg` for the socket. `false` once the socket writer is gone.
fn send(tx: &Tx, msg: &SyncMessage) -> bool {
    match msg.to_json() {
        Ok(json) => tx.send(Message::Text(json)).is_ok(),
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            true
        }
    }
}
