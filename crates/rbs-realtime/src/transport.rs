//! Socket transport seam and its WebSocket implementation.

use crate::{RealtimeError, RealtimeResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

const EVENT_BUFFER: usize = 100;
const OUTGOING_BUFFER: usize = 100;

/// Close code reported when the peer closes without a status.
const NO_STATUS_CODE: u16 = 1005;

/// Event reported by an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Message(String),
    Failure(String),
    Closed { code: u16, reason: String },
}

/// Handle to one socket.
///
/// Dropping `outgoing` closes the socket. `events` ends after a terminal
/// `Failure` or `Closed`.
pub struct SocketConnection {
    pub events: mpsc::Receiver<SocketEvent>,
    pub outgoing: mpsc::Sender<String>,
}

/// Opens authenticated realtime sockets.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn open(&self, access_token: &str) -> RealtimeResult<SocketConnection>;
}

/// `SocketTransport` over tokio-tungstenite. The access token travels in
/// the `auth` query parameter.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn authenticated_url(&self, access_token: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("auth", access_token);
        url
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn open(&self, access_token: &str) -> RealtimeResult<SocketConnection> {
        info!(url = %self.url, "Opening realtime socket");
        let url = self.authenticated_url(access_token);
        let (ws_stream, _) = connect_async(url.as_str()).await?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_BUFFER);
        event_tx
            .try_send(SocketEvent::Opened)
            .map_err(|e| RealtimeError::TransportFailure(e.to_string()))?;

        tokio::spawn(drive_socket(ws_stream, event_tx, outgoing_rx));

        Ok(SocketConnection {
            events: event_rx,
            outgoing: outgoing_tx,
        })
    }
}

/// Pump frames both ways until either side finishes.
async fn drive_socket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    events: mpsc::Sender<SocketEvent>,
    mut outgoing: mpsc::Receiver<String>,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!(error = %e, "Realtime send failed");
                        let _ = events.send(SocketEvent::Failure(e.to_string())).await;
                        return;
                    }
                }
                None => {
                    debug!("Closing realtime socket");
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    return;
                }
            },

            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if events.send(SocketEvent::Message(text)).await.is_err() {
                        let _ = write.close().await;
                        return;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((NO_STATUS_CODE, String::new()));
                    info!(code, reason = %reason, "Realtime socket closed by peer");
                    let _ = events.send(SocketEvent::Closed { code, reason }).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Realtime socket error");
                    let _ = events.send(SocketEvent::Failure(e.to_string())).await;
                    return;
                }
                None => {
                    let _ = events
                        .send(SocketEvent::Failure("socket stream ended".to_string()))
                        .await;
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_travels_as_auth_query() {
        let transport = WebSocketTransport::new(Url::parse("wss://socket.rtbs.io/").unwrap());
        let url = transport.authenticated_url("a.b+c");
        assert_eq!(url.as_str(), "wss://socket.rtbs.io/?auth=a.b%2Bc");
        // The configured URL stays token-free for logging.
        assert_eq!(transport.url().query(), None);
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        // Nothing listens on port 9 of localhost.
        let transport = WebSocketTransport::new(Url::parse("ws://127.0.0.1:9/").unwrap());
        assert!(transport.open("token").await.is_err());
    }
}
