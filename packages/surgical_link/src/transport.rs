//! Socket seam between the connection actor and the wire.
//!
//! A [`Socket`] is a pair of channels: commands go out to a pump task that
//! owns the real WebSocket, events come back in arrival order. The actor never
//! touches tungstenite types, so tests can hand it channel pairs directly.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

use crate::error::ClientError;

/// Close code for an intentional, clean shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when a close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Close code for a connection lost without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// How long to wait for the peer to answer our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Something that happened on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Text(String),
    Binary(Vec<u8>),
    /// Transport error; a `Closed` event follows.
    Error(String),
    Closed { code: u16 },
}

/// Something to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    Text(String),
    Binary(Vec<u8>),
    Close { code: u16 },
}

/// The connection-owner side of an open socket.
pub struct Socket {
    pub outbound: mpsc::UnboundedSender<SocketCommand>,
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

/// The wire side of an open socket.
pub struct SocketPeer {
    pub commands: mpsc::UnboundedReceiver<SocketCommand>,
    pub events: mpsc::UnboundedSender<SocketEvent>,
}

impl Socket {
    /// Create a connected owner/peer pair.
    pub fn pair() -> (Socket, SocketPeer) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Socket {
                outbound: cmd_tx,
                inbound: event_rx,
            },
            SocketPeer {
                commands: cmd_rx,
                events: event_tx,
            },
        )
    }

    pub fn send(&self, command: SocketCommand) -> Result<(), ClientError> {
        self.outbound
            .send(command)
            .map_err(|_| ClientError::SocketClosed)
    }
}

pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<Socket, ClientError>> + Send>>;

/// Opens sockets. The production implementation is [`TungsteniteConnector`].
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> ConnectFuture;
}

/// Connects with tokio-tungstenite and pumps the stream in a spawned task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, url: &str) -> ConnectFuture {
        let url = url.to_string();
        Box::pin(async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(ClientError::from_tungstenite)?;
            let (socket, peer) = Socket::pair();
            tokio::spawn(pump(ws_stream, peer));
            Ok(socket)
        })
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Shuttle commands to the stream and frames back to the owner until either
/// side closes.
async fn pump(ws_stream: WsStream, peer: SocketPeer) {
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let SocketPeer {
        mut commands,
        events,
    } = peer;
    let mut closing = false;
    let close_grace = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(close_grace);

    loop {
        tokio::select! {
            command = commands.recv(), if !closing => {
                let result = match command {
                    Some(SocketCommand::Text(text)) => {
                        ws_write.send(tungstenite::Message::Text(text.into())).await
                    }
                    Some(SocketCommand::Binary(data)) => {
                        ws_write.send(tungstenite::Message::Binary(data.into())).await
                    }
                    Some(SocketCommand::Close { code }) => {
                        closing = true;
                        close_grace
                            .as_mut()
                            .reset(tokio::time::Instant::now() + CLOSE_GRACE);
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: "".into(),
                        };
                        ws_write.send(tungstenite::Message::Close(Some(frame))).await
                    }
                    None => {
                        // Owner dropped the socket without closing it.
                        closing = true;
                        close_grace
                            .as_mut()
                            .reset(tokio::time::Instant::now() + CLOSE_GRACE);
                        ws_write.send(tungstenite::Message::Close(None)).await
                    }
                };
                if let Err(e) = result {
                    warn!("websocket write failed: {}", e);
                    let _ = events.send(SocketEvent::Error(e.to_string()));
                    let _ = events.send(SocketEvent::Closed { code: ABNORMAL_CLOSURE });
                    break;
                }
            }

            () = &mut close_grace, if closing => {
                debug!("close handshake timed out");
                break;
            }

            frame = ws_read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        let _ = events.send(SocketEvent::Text(text.to_string()));
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        let _ = events.send(SocketEvent::Binary(data.to_vec()));
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let code = frame
                            .map(|f| u16::from(f.code))
                            .unwrap_or(NO_STATUS_RECEIVED);
                        debug!(code, "websocket closed by peer");
                        let _ = events.send(SocketEvent::Closed { code });
                        break;
                    }
                    Some(Ok(_)) => {
                        // ping/pong are answered by tungstenite
                    }
                    Some(Err(e)) => {
                        if closing {
                            break;
                        }
                        warn!("websocket read failed: {}", e);
                        let _ = events.send(SocketEvent::Error(e.to_string()));
                        let _ = events.send(SocketEvent::Closed { code: ABNORMAL_CLOSURE });
                        break;
                    }
                    None => {
                        let _ = events.send(SocketEvent::Closed { code: ABNORMAL_CLOSURE });
                        break;
                    }
                }
            }
        }
    }
}

/// Scripted connector shared by the crate's tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy)]
    pub enum Script {
        Accept,
        Refuse,
        Hang,
    }

    /// Follows a script and hands accepted peers to the test. Once the
    /// script runs out every attempt is refused.
    pub struct FakeConnector {
        script: Mutex<VecDeque<Script>>,
        attempts: Mutex<Vec<String>>,
        peers: mpsc::UnboundedSender<SocketPeer>,
    }

    impl FakeConnector {
        pub fn new(script: &[Script]) -> (Arc<Self>, mpsc::UnboundedReceiver<SocketPeer>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                attempts: Mutex::new(Vec::new()),
                peers: tx,
            });
            (connector, rx)
        }

        pub fn attempts(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }

        pub fn urls(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl Connector for FakeConnector {
        fn connect(&self, url: &str) -> ConnectFuture {
            self.attempts.lock().unwrap().push(url.to_string());
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Refuse);
            match step {
                Script::Accept => {
                    let (socket, peer) = Socket::pair();
                    let _ = self.peers.send(peer);
                    Box::pin(async move { Ok(socket) })
                }
                Script::Refuse => Box::pin(async { Err(ClientError::Unavailable) }),
                Script::Hang => Box::pin(std::future::pending()),
            }
        }
    }
}
