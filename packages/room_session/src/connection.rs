//! Connection Manager
//!
//! Owns one live duplex connection to a room's message stream and
//! translates transport events into four abstract signals. Knows nothing
//! about message semantics; retry policy belongs to the session controller.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ConnectError;

/// Abstract transport signals reported to the session controller.
///
/// `Opened` is always the first signal. `Errored` and `Closed` are
/// terminal: the transport task releases its resources and emits nothing
/// further after either.
#[derive(Debug, Clone)]
pub enum ConnectionSignal {
    Opened,
    MessageReceived(String),
    Errored(String),
    Closed(Option<u16>),
}

/// `send_frame` failed because the transport task is gone or backlogged.
#[derive(Debug, thiserror::Error)]
#[error("transport unavailable: {reason}")]
pub struct TransportSendError {
    pub reason: &'static str,
}

/// Handle to a live room stream connection.
///
/// Exclusively owned by the session that opened it. `close` consumes the
/// handle, so release happens at most once; dropping the handle releases
/// the transport as well.
#[derive(Debug)]
pub struct RoomConnection {
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl RoomConnection {
    pub fn new(outbound: mpsc::Sender<String>, cancel: CancellationToken) -> Self {
        Self { outbound, cancel }
    }

    /// Queue a raw frame for transmission. Fire-and-forget: delivery is
    /// only ever observed as the eventual broadcast echo.
    pub fn send_frame(&self, frame: String) -> Result<(), TransportSendError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportSendError {
                reason: "outbound queue full",
            },
            mpsc::error::TrySendError::Closed(_) => TransportSendError {
                reason: "transport task gone",
            },
        })
    }

    /// Release the transport.
    pub fn close(self) {}
}

impl Drop for RoomConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Opens the live duplex connection for one room.
///
/// Each call produces an independent connection; the session controller
/// guarantees at most one per open room.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Initiate a connection. Signals, starting with `Opened`, arrive on
    /// the returned receiver until the connection is released.
    async fn open(
        &self,
        room_id: &str,
    ) -> Result<(RoomConnection, mpsc::Receiver<ConnectionSignal>), ConnectError>;
}

const CHANNEL_CAPACITY: usize = 64;

/// `Connector` backed by the suite's WebSocket stream endpoint.
pub struct WsConnector {
    ws_base: String,
    token: String,
}

impl WsConnector {
    pub fn new(ws_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
            token: token.into(),
        }
    }

    fn stream_url(&self, room_id: &str) -> String {
        format!(
            "{}/api/rooms/{}/stream?token={}",
            self.ws_base.trim_end_matches('/'),
            room_id,
            self.token
        )
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(
        &self,
        room_id: &str,
    ) -> Result<(RoomConnection, mpsc::Receiver<ConnectionSignal>), ConnectError> {
        let url = self.stream_url(room_id);
        let (stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(ConnectError::from_tungstenite)?;
        debug!(room = %room_id, "room stream connected");

        let (signal_tx, signal_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        tokio::spawn(run_transport(stream, signal_tx, outbound_rx, cancel.clone()));

        Ok((RoomConnection::new(outbound_tx, cancel), signal_rx))
    }
}

/// Pump the socket until it closes, errors, or the handle is released.
/// Emits at most one terminal signal, then drops the stream.
async fn run_transport(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    signals: mpsc::Sender<ConnectionSignal>,
    mut outbound: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    let (mut write, mut read) = stream.split();

    if signals.send(ConnectionSignal::Opened).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = write.send(tungstenite::Message::Text(text.into())).await {
                        let _ = signals.send(ConnectionSignal::Errored(e.to_string())).await;
                        break;
                    }
                }
                None => break,
            },

            msg = read.next() => match msg {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    if signals
                        .send(ConnectionSignal::MessageReceived(text.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    let _ = signals.send(ConnectionSignal::Closed(code)).await;
                    break;
                }
                // Ping/pong are handled by tungstenite; binary is not part
                // of this protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = signals.send(ConnectionSignal::Errored(e.to_string())).await;
                    break;
                }
                None => {
                    let _ = signals.send(ConnectionSignal::Closed(None)).await;
                    break;
                }
            },
        }
    }

    debug!("room stream transport released");
}
