use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use super::{Subscriber, Transport, TransportError};

enum Command {
    Frame(String),
    Close,
}

/// Channel subscription bridged over a WebSocket relay.
///
/// Frames are JSON text. Outbound traffic goes through an unbounded queue
/// drained by a forwarder task; inbound traffic is decoded by a receiver
/// task and handed to the [`Subscriber`]. The relay is responsible for
/// fan-out and for not echoing a connection's own frames back to it.
pub struct WsTransport {
    out: mpsc::UnboundedSender<Command>,
    recv: JoinHandle<()>,
    open: AtomicBool,
}

impl WsTransport {
    /// Connect to `relay_url` and join `channel` (carried as a query
    /// parameter on the ws URL).
    pub async fn connect(
        relay_url: &str,
        channel: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<Self, TransportError> {
        let mut url = Url::parse(relay_url)
            .map_err(|err| TransportError::Unavailable(format!("invalid relay url: {err}")))?;
        url.query_pairs_mut().append_pair("channel", channel);

        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Unavailable(err.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let (out, mut queue) = mpsc::unbounded_channel::<Command>();

        // Drain the outbound queue into the socket. Detached: it exits on
        // a Close command, on a dead socket, or once the queue sender is
        // dropped, so queued frames still flush after the handle is gone.
        // A send failure means the connection is gone; peers simply stop
        // hearing from us.
        tokio::spawn(async move {
            while let Some(cmd) = queue.recv().await {
                match cmd {
                    Command::Frame(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Command::Close => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let recv = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        let text: String = text.to_string();
                        match serde_json::from_str::<Value>(&text) {
                            Ok(frame) => subscriber.on_frame(frame),
                            Err(err) => subscriber.on_frame_error(&err.to_string()),
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(WsMessage::Binary(_))
                    | Ok(WsMessage::Ping(_))
                    | Ok(WsMessage::Pong(_))
                    | Ok(WsMessage::Frame(_)) => {}
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            out,
            recv,
            open: AtomicBool::new(true),
        })
    }
}

impl Transport for WsTransport {
    fn publish(&self, frame: Value) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let text = frame.to_string();
        self.out
            .send(Command::Frame(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.out.send(Command::Close);
            self.recv.abort();
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        // Enqueues a Close the forwarder delivers before exiting.
        self.close();
    }
}
