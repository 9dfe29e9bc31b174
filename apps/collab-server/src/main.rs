//! Collaboration relay for SmartSchedule.
//! Accepts WebSocket connections under /collaboration/<room>, bridges each
//! into its room through the session manager, and relays document updates
//! and awareness between peers.

use collaboration::{
    CollaborationError, PeerId, PeerSender, RoomId, SessionManager, SyncMessage,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

fn bind_addr() -> String {
    std::env::var("SMARTSCHEDULE_ADDR").unwrap_or_else(|_| "127.0.0.1:5000".to_string())
}

fn awareness_ttl() -> chrono::Duration {
    let secs = std::env::var("SMARTSCHEDULE_AWARENESS_TTL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);
    chrono::Duration::seconds(secs)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new("collab_server=debug,collaboration=debug"),
        ))
        .init();

    let addr = bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("collaboration relay listening on {addr}");

    let manager = Arc::new(SessionManager::new());

    // Awareness entries decay unless renewed; sweep periodically.
    {
        let manager = manager.clone();
        let ttl = awareness_ttl();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(30));
            loop {
                tick.tick().await;
                manager.sweep_awareness(ttl).await;
            }
        });
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                tokio::spawn(handle_connection(stream, addr, manager.clone()));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down collaboration relay");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, manager: Arc<SessionManager>) {
    let mut request_path = String::new();
    let ws_stream = match tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, resp: Response| {
            request_path = req
                .uri()
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_else(|| req.uri().path().to_string());
            Ok(resp)
        },
    )
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            error!(%addr, "websocket handshake failed: {e}");
            return;
        }
    };

    // Namespace check before anything else; unknown paths get a policy close.
    let room = match RoomId::from_request_path(&request_path) {
        Ok(room) => room,
        Err(e) => {
            warn!(%addr, path = %request_path, "rejecting connection: {e}");
            let mut ws_stream = ws_stream;
            let _ = ws_stream
                .close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: e.to_string().into(),
                }))
                .await;
            return;
        }
    };
    info!(%addr, room = %room, "client connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<SyncMessage>();

    // Writer task: one slow peer only backs up its own channel.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("failed to serialize outbound message: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut attached: Option<PeerId> = None;

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!(%addr, room = %room, "receive error: {e}");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                match handle_text(&text, &room, &manager, &tx, &mut attached).await {
                    Ok(()) => {}
                    Err(e @ CollaborationError::Serialization(_)) => {
                        // Malformed traffic: tell the peer and drop it; the
                        // room keeps going for everyone else.
                        warn!(%addr, room = %room, "dropping connection: {e}");
                        let _ = tx.send(SyncMessage::Error {
                            message: e.to_string(),
                        });
                        break;
                    }
                    Err(e) => {
                        warn!(%addr, room = %room, "message failed: {e}");
                        let _ = tx.send(SyncMessage::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }
            Message::Close(_) => {
                debug!(%addr, "client requested close");
                break;
            }
            // Ping/pong frames are handled by the protocol layer.
            _ => {}
        }
    }

    if let Some(peer_id) = attached {
        manager.detach(&room, peer_id).await;
    }
    send_task.abort();
    info!(%addr, room = %room, "connection closed");
}

async fn handle_text(
    text: &str,
    room: &RoomId,
    manager: &SessionManager,
    tx: &PeerSender,
    attached: &mut Option<PeerId>,
) -> collaboration::Result<()> {
    let msg: SyncMessage = serde_json::from_str(text)
        .map_err(|e| CollaborationError::Serialization(e.to_string()))?;

    match msg {
        SyncMessage::Connect {
            peer_id,
            state,
            vector_clock,
        } => {
            manager
                .attach(room, peer_id, state, &vector_clock, tx.clone())
                .await?;
            *attached = Some(peer_id);
        }

        SyncMessage::Update { operations } => {
            let peer_id = attached
                .ok_or_else(|| CollaborationError::Sync("update before connect".into()))?;
            manager.handle_update(room, peer_id, operations).await?;
        }

        SyncMessage::SyncRequest { since } => {
            attached
                .ok_or_else(|| CollaborationError::Sync("sync request before connect".into()))?;
            let response = manager.handle_sync_request(room, &since).await?;
            tx.send(response)
                .map_err(|_| CollaborationError::ChannelClosed("local writer".into()))?;
        }

        SyncMessage::Awareness { update } => {
            let peer_id = attached
                .ok_or_else(|| CollaborationError::Sync("awareness before connect".into()))?;
            manager.handle_awareness(room, peer_id, update).await?;
        }

        SyncMessage::Ping => {
            tx.send(SyncMessage::Pong)
                .map_err(|_| CollaborationError::ChannelClosed("local writer".into()))?;
        }

        SyncMessage::Pong => {}

        other => {
            debug!(room = %room, "ignoring unexpected message: {other:?}");
        }
    }

    Ok(())
}
