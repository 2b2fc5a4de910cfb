//! WebSocket ↔ channel bridge
//!
//! Splits a WebSocket into a writer task fed by an unbounded channel and a
//! reader task that forwards text frames to the session. Closing either side
//! winds the other down: when every outbound sender is dropped the writer
//! sends a Close frame, and when the peer goes away the inbound channel
//! closes.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// How long a closing side waits for the peer to answer its Close frame.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub struct TransportTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl TransportTasks {
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }

    /// Wait up to `grace` for the close handshake to finish, then abort
    /// whatever is still running. Returns whether both tasks ended on their
    /// own.
    ///
    /// Every outbound sender must be dropped first, otherwise the writer
    /// never sends its Close frame.
    pub async fn finish(mut self, grace: Duration) -> bool {
        let ended = tokio::time::timeout(grace, async {
            let _ = (&mut self.writer).await;
            let _ = (&mut self.reader).await;
        })
        .await
        .is_ok();
        if !ended {
            self.abort();
        }
        ended
    }
}

/// Returns the outbound sender, the inbound receiver and the task handles.
pub fn spawn<S>(
    ws: WebSocketStream<S>,
    charge_point_id: &str,
) -> (
    mpsc::UnboundedSender<String>,
    mpsc::UnboundedReceiver<String>,
    TransportTasks,
)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

    let cp_id = charge_point_id.to_string();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            debug!(charge_point_id = cp_id.as_str(), frame = msg.as_str(), "->");
            if let Err(e) = ws_sender.send(Message::Text(msg)).await {
                warn!(charge_point_id = cp_id.as_str(), error = %e, "Send failed");
                return;
            }
        }
        let _ = ws_sender.close().await;
    });

    let cp_id = charge_point_id.to_string();
    let reader = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if inbound_tx.send(text).is_err() {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!(charge_point_id = cp_id.as_str(), ?frame, "Close frame received");
                    break;
                }
                Ok(Message::Binary(data)) => {
                    warn!(
                        charge_point_id = cp_id.as_str(),
                        bytes = data.len(),
                        "Binary frame ignored"
                    );
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(e) => {
                    warn!(charge_point_id = cp_id.as_str(), error = %e, "WebSocket error");
                    break;
                }
            }
        }
    });

    (outbound_tx, inbound_rx, TransportTasks { reader, writer })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (server, client) = pair().await;
        let (server_out, mut server_in, _server_tasks) = spawn(server, "CP");
        let (client_out, mut client_in, _client_tasks) = spawn(client, "CP");

        client_out.send("[2,\"1\",\"Heartbeat\",{}]".into()).unwrap();
        assert_eq!(
            server_in.recv().await.as_deref(),
            Some("[2,\"1\",\"Heartbeat\",{}]")
        );

        server_out.send("[3,\"1\",{}]".into()).unwrap();
        assert_eq!(client_in.recv().await.as_deref(), Some("[3,\"1\",{}]"));
    }

    #[tokio::test]
    async fn dropping_outbound_closes_peer_inbound() {
        let (server, client) = pair().await;
        let (server_out, _server_in, server_tasks) = spawn(server, "CP");
        let (_client_out, mut client_in, _client_tasks) = spawn(client, "CP");

        drop(server_out);
        assert_eq!(client_in.recv().await, None);
        server_tasks.abort();
    }

    #[tokio::test]
    async fn finish_completes_close_handshake() {
        let (server, mut client) = pair().await;
        let (server_out, _server_in, server_tasks) = spawn(server, "CP");

        let peer = tokio::spawn(async move {
            let mut saw_close = false;
            while let Some(Ok(msg)) = client.next().await {
                saw_close |= msg.is_close();
            }
            saw_close
        });

        drop(server_out);
        assert!(server_tasks.finish(Duration::from_secs(5)).await);
        assert!(peer.await.unwrap(), "peer received a Close frame");
    }

    #[tokio::test(start_paused = true)]
    async fn finish_aborts_when_peer_stays_silent() {
        let (server, _client) = pair().await;
        let (server_out, _server_in, server_tasks) = spawn(server, "CP");

        drop(server_out);
        assert!(!server_tasks.finish(Duration::from_secs(2)).await);
    }
}
