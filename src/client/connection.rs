use crate::types::ClientEvent;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

/// What the connection task hands back to the client.
#[derive(Debug)]
pub(crate) enum Inbound {
    Text(String),
    /// Sent once, last. Carries the close reason when there was one.
    Closed(Option<String>),
}

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Owns the socket: serializes outgoing events, forwards inbound text frames,
/// and reports closure exactly once.
pub(super) fn spawn_connection_task(
    ws_stream: WsStream,
    mut outgoing_rx: mpsc::Receiver<ClientEvent>,
    inbound_tx: mpsc::Sender<Inbound>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (mut ws_sink, mut ws_source) = ws_stream.split();
        info!("[Connection] Processing task started.");

        let close_reason = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    info!("[Connection] Shutdown requested.");
                    if let Err(e) = ws_sink.send(Message::Close(None)).await {
                        debug!("[Connection] Close frame not sent: {}", e);
                    }
                    break None;
                }
                maybe_event = outgoing_rx.recv() => {
                    let Some(event) = maybe_event else {
                        info!("[Connection] Outgoing channel closed.");
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break None;
                    };
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("[Connection] Failed to serialize {}: {}", event.type_name(), e);
                            continue;
                        }
                    };
                    trace!("[Connection] Sending {}.", event.type_name());
                    if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                        error!("[Connection] WebSocket send error: {}", e);
                        break Some(e.to_string());
                    }
                }
                frame = ws_source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(Inbound::Text(text.as_str().to_owned())).await.is_err() {
                            info!("[Connection] Inbound receiver dropped, stopping.");
                            break None;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("[Connection] Server closed the connection: {:?}", frame);
                        break frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|reason| !reason.is_empty());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("[Connection] Ignoring {} byte binary frame.", data.len());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("[Connection] WebSocket read error: {}", e);
                        break Some(e.to_string());
                    }
                    None => {
                        info!("[Connection] WebSocket stream ended.");
                        break None;
                    }
                }
            }
        };

        let _ = inbound_tx.send(Inbound::Closed(close_reason)).await;
        info!("[Connection] Processing task stopped.");
    })
}
